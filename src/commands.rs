//! CLI argument definitions
//!
//! Defines the clap arguments for the mocha-chrome CLI.

use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Test page: a path to an HTML file or a URL
    pub file: String,

    /// mocha reporter to use in the page
    #[arg(long, short)]
    pub reporter: Option<String>,

    /// mocha interface (bdd, tdd, qunit, exports)
    #[arg(long, short)]
    pub ui: Option<String>,

    /// Disable colored reporter output
    #[arg(long)]
    pub no_colors: bool,

    /// Extra mocha.setup options as a JSON object, e.g. '{"timeout": 5000}'
    #[arg(long, value_name = "JSON")]
    pub mocha: Option<String>,

    /// Chrome executable to launch
    #[arg(long, value_name = "PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Extra Chrome command line flag; can be given multiple times
    #[arg(long = "chrome-flags", value_name = "FLAG", allow_hyphen_values = true)]
    pub chrome_flags: Vec<String>,

    /// Attach to a running browser's DevTools endpoint instead of launching one
    #[arg(long, value_name = "URL")]
    pub remote: Option<String>,

    /// Drop page console output
    #[arg(long)]
    pub ignore_console: bool,

    /// Log uncaught page exceptions instead of failing
    #[arg(long)]
    pub ignore_exceptions: bool,

    /// Log failed resource loads instead of failing
    #[arg(long)]
    pub ignore_resource_errors: bool,

    /// How long after page load mocha may take to appear (ms)
    #[arg(long, value_name = "MS")]
    pub load_timeout: Option<u64>,

    /// How long mocha.run() may take to be called (ms)
    #[arg(long, value_name = "MS")]
    pub run_timeout: Option<u64>,

    /// Ceiling for the whole run (ms)
    #[arg(long, value_name = "MS")]
    pub timeout: Option<u64>,

    /// Configuration file (default: the platform config directory)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Also write detailed logs to this file
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Show debug logs on stderr
    #[arg(long, short)]
    pub verbose: bool,
}
