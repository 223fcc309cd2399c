//! mocha-chrome - run Mocha browser tests headlessly in Chrome
//!
//! Loads a test page in headless Chrome, lets mocha run, relays the
//! reporter output and exits with the result.

use clap::Parser;
use mocha_chrome::commands::RunArgs;
use mocha_chrome::{cli, common::logging};

#[derive(Parser)]
#[command(name = "mocha-chrome", about = "Run Mocha browser tests in headless Chrome")]
#[command(version, long_about = None)]
struct Cli {
    #[command(flatten)]
    args: RunArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_guard = logging::init_cli(cli.args.verbose, cli.args.log_file.as_deref());

    let code = match cli::dispatch(cli.args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            cli::error_exit_code(&e)
        }
    };

    // flush the log file before exiting
    drop(log_guard);
    std::process::exit(code);
}
