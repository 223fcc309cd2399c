//! Run configuration
//!
//! A `RunConfig` is built once per run: defaults, then the optional TOML
//! file, then explicit overrides (usually from the command line). Explicit
//! fields beat defaults; the opaque reporter options merge key-wise.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Page to load; a file path is turned into a `file://` URL by the CLI
    #[serde(default)]
    pub url: Option<String>,

    /// Which page events to ignore
    #[serde(default)]
    pub ignore: IgnoreConfig,

    /// Deadline settings in milliseconds
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Options handed to `mocha.setup` in the page
    #[serde(default)]
    pub mocha: MochaOptions,

    /// Browser launch / attach settings
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Clear localStorage for the page's origin before navigating
    #[serde(default = "default_true")]
    pub clear_local_storage: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            url: None,
            ignore: IgnoreConfig::default(),
            timeouts: Timeouts::default(),
            mocha: MochaOptions::default(),
            browser: BrowserConfig::default(),
            clear_local_storage: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Per-category ignore flags
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct IgnoreConfig {
    /// Drop page console output (including reporter output)
    #[serde(default)]
    pub console: bool,

    /// Log uncaught page exceptions instead of failing the run
    #[serde(default)]
    pub exceptions: bool,

    /// Log failed resource loads instead of failing the run
    #[serde(default)]
    pub resource_errors: bool,
}

/// Timeout settings in milliseconds
#[derive(Debug, Clone, Deserialize)]
pub struct Timeouts {
    /// How long after page load `mocha` may take to appear
    #[serde(default = "default_liveness")]
    pub mocha_load_ms: u64,

    /// How long after `mocha` appears `mocha.run()` may take to be called
    #[serde(default = "default_liveness")]
    pub mocha_run_ms: u64,

    /// Ceiling on the whole run once mocha has started
    #[serde(default = "default_run")]
    pub run_ms: u64,

    /// Interval between liveness probes
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Timeout for a single CDP command
    #[serde(default = "default_cdp_request")]
    pub cdp_request_ms: u64,

    /// Timeout for Chrome to print its DevTools endpoint
    #[serde(default = "default_browser_launch")]
    pub browser_launch_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            mocha_load_ms: default_liveness(),
            mocha_run_ms: default_liveness(),
            run_ms: default_run(),
            poll_interval_ms: default_poll_interval(),
            cdp_request_ms: default_cdp_request(),
            browser_launch_ms: default_browser_launch(),
        }
    }
}

fn default_liveness() -> u64 {
    1000
}
fn default_run() -> u64 {
    300_000
}
fn default_poll_interval() -> u64 {
    50
}
fn default_cdp_request() -> u64 {
    10_000
}
fn default_browser_launch() -> u64 {
    15_000
}

impl Timeouts {
    pub fn mocha_load(&self) -> Duration {
        Duration::from_millis(self.mocha_load_ms)
    }

    pub fn mocha_run(&self) -> Duration {
        Duration::from_millis(self.mocha_run_ms)
    }

    pub fn run(&self) -> Duration {
        Duration::from_millis(self.run_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cdp_request(&self) -> Duration {
        Duration::from_millis(self.cdp_request_ms)
    }

    pub fn browser_launch(&self) -> Duration {
        Duration::from_millis(self.browser_launch_ms)
    }
}

/// Reporter options forwarded to the page
#[derive(Debug, Clone, Deserialize)]
pub struct MochaOptions {
    #[serde(default = "default_reporter")]
    pub reporter: String,

    #[serde(default = "default_ui")]
    pub ui: String,

    /// Also accepted as `useColors`, the name `mocha.setup` uses
    #[serde(default = "default_true", alias = "useColors")]
    pub use_colors: bool,

    /// Any other `mocha.setup` keys, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for MochaOptions {
    fn default() -> Self {
        Self {
            reporter: default_reporter(),
            ui: default_ui(),
            use_colors: true,
            extra: Map::new(),
        }
    }
}

fn default_reporter() -> String {
    "spec".to_string()
}

fn default_ui() -> String {
    "bdd".to_string()
}

impl MochaOptions {
    /// The object the in-page script merges into `mocha.setup`
    pub fn to_page_options(&self) -> Value {
        let mut options = self.extra.clone();
        options.insert("reporter".to_string(), Value::from(self.reporter.clone()));
        options.insert("ui".to_string(), Value::from(self.ui.clone()));
        options.insert("useColors".to_string(), Value::from(self.use_colors));
        Value::Object(options)
    }
}

/// Browser settings
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    /// Explicit Chrome executable
    #[serde(default)]
    pub chrome_path: Option<PathBuf>,

    /// Extra command line flags for Chrome
    #[serde(default)]
    pub chrome_flags: Vec<String>,

    #[serde(default = "default_true")]
    pub headless: bool,

    /// DevTools HTTP endpoint of an already running browser (`http://host:port`)
    #[serde(default)]
    pub remote: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            chrome_flags: Vec::new(),
            headless: true,
            remote: None,
        }
    }
}

/// Explicit values that take precedence over the file and defaults
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub url: Option<String>,
    pub ignore_console: Option<bool>,
    pub ignore_exceptions: Option<bool>,
    pub ignore_resource_errors: Option<bool>,
    pub mocha_load_ms: Option<u64>,
    pub mocha_run_ms: Option<u64>,
    pub run_ms: Option<u64>,
    pub reporter: Option<String>,
    pub ui: Option<String>,
    pub use_colors: Option<bool>,
    pub mocha_extra: Map<String, Value>,
    pub chrome_path: Option<PathBuf>,
    pub chrome_flags: Vec<String>,
    pub remote: Option<String>,
}

impl RunConfig {
    /// Defaults for the given page
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Load configuration from the default config file
    ///
    /// Returns default configuration if the file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse TOML configuration text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Apply explicit overrides on top of this configuration
    pub fn apply(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(url) = overrides.url {
            self.url = Some(url);
        }
        if let Some(v) = overrides.ignore_console {
            self.ignore.console = v;
        }
        if let Some(v) = overrides.ignore_exceptions {
            self.ignore.exceptions = v;
        }
        if let Some(v) = overrides.ignore_resource_errors {
            self.ignore.resource_errors = v;
        }
        if let Some(v) = overrides.mocha_load_ms {
            self.timeouts.mocha_load_ms = v;
        }
        if let Some(v) = overrides.mocha_run_ms {
            self.timeouts.mocha_run_ms = v;
        }
        if let Some(v) = overrides.run_ms {
            self.timeouts.run_ms = v;
        }
        if let Some(reporter) = overrides.reporter {
            self.mocha.reporter = reporter;
        }
        if let Some(ui) = overrides.ui {
            self.mocha.ui = ui;
        }
        if let Some(v) = overrides.use_colors {
            self.mocha.use_colors = v;
        }
        for (key, value) in overrides.mocha_extra {
            match (key.as_str(), value) {
                ("reporter", Value::String(s)) => self.mocha.reporter = s,
                ("ui", Value::String(s)) => self.mocha.ui = s,
                ("useColors" | "use_colors", Value::Bool(b)) => self.mocha.use_colors = b,
                (_, value) => {
                    self.mocha.extra.insert(key, value);
                }
            }
        }
        if overrides.chrome_path.is_some() {
            self.browser.chrome_path = overrides.chrome_path;
        }
        self.browser.chrome_flags.extend(overrides.chrome_flags);
        if overrides.remote.is_some() {
            self.browser.remote = overrides.remote;
        }
        self
    }

    /// Check the configuration before any session is opened
    pub fn validate(&self) -> Result<reqwest::Url> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| Error::Config("no page URL given".to_string()))?;
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| Error::Config(format!("invalid page URL '{}': {}", url, e)))?;

        let deadlines = [
            ("timeouts.mocha_load_ms", self.timeouts.mocha_load_ms),
            ("timeouts.mocha_run_ms", self.timeouts.mocha_run_ms),
            ("timeouts.run_ms", self.timeouts.run_ms),
            ("timeouts.poll_interval_ms", self.timeouts.poll_interval_ms),
            ("timeouts.cdp_request_ms", self.timeouts.cdp_request_ms),
        ];
        for (name, value) in deadlines {
            if value == 0 {
                return Err(Error::Config(format!("{} must be a positive number", name)));
            }
        }

        if let Some(remote) = &self.browser.remote {
            reqwest::Url::parse(remote)
                .map_err(|e| Error::Config(format!("invalid remote endpoint '{}': {}", remote, e)))?;
        }

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.timeouts.mocha_load_ms, 1000);
        assert_eq!(config.timeouts.mocha_run_ms, 1000);
        assert_eq!(config.mocha.reporter, "spec");
        assert!(config.mocha.use_colors);
        assert!(config.clear_local_storage);
        assert!(!config.ignore.console);
    }

    #[test]
    fn test_parse_partial_file() {
        let config = RunConfig::parse(
            r#"
url = "http://localhost:8080/test.html"

[ignore]
exceptions = true

[timeouts]
mocha_load_ms = 2500

[mocha]
reporter = "dot"
timeout = 5000
grep = "slow"
"#,
        )
        .unwrap();

        assert!(config.ignore.exceptions);
        assert!(!config.ignore.console);
        assert_eq!(config.timeouts.mocha_load_ms, 2500);
        assert_eq!(config.timeouts.mocha_run_ms, 1000);
        assert_eq!(config.mocha.reporter, "dot");
        assert_eq!(config.mocha.ui, "bdd");
        assert_eq!(config.mocha.extra.get("grep"), Some(&Value::from("slow")));
        assert_eq!(config.mocha.extra.get("timeout"), Some(&Value::from(5000)));
    }

    #[test]
    fn test_parse_error() {
        let err = RunConfig::parse("[timeouts]\nmocha_load_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_overrides_beat_file() {
        let mut base = RunConfig::parse("[mocha]\nreporter = \"dot\"\nbail = true\n").unwrap();
        base.browser.chrome_flags.push("--no-sandbox".to_string());

        let mut extra = Map::new();
        extra.insert("timeout".to_string(), Value::from(200));
        extra.insert("useColors".to_string(), Value::from(false));

        let config = base.apply(ConfigOverrides {
            url: Some("file:///tmp/test.html".to_string()),
            reporter: Some("xunit".to_string()),
            ignore_console: Some(true),
            mocha_load_ms: Some(50),
            mocha_extra: extra,
            chrome_flags: vec!["--mute-audio".to_string()],
            ..Default::default()
        });

        assert_eq!(config.url.as_deref(), Some("file:///tmp/test.html"));
        assert_eq!(config.mocha.reporter, "xunit");
        assert!(!config.mocha.use_colors);
        assert!(config.ignore.console);
        assert_eq!(config.timeouts.mocha_load_ms, 50);
        // nested options merge key-wise
        assert_eq!(config.mocha.extra.get("bail"), Some(&Value::from(true)));
        assert_eq!(config.mocha.extra.get("timeout"), Some(&Value::from(200)));
        assert_eq!(config.browser.chrome_flags, vec!["--no-sandbox", "--mute-audio"]);
    }

    #[test]
    fn test_page_options() {
        let mut options = MochaOptions::default();
        options.use_colors = false;
        options.extra.insert("timeout".to_string(), Value::from(100));

        let value = options.to_page_options();
        assert_eq!(value["reporter"], "spec");
        assert_eq!(value["ui"], "bdd");
        assert_eq!(value["useColors"], false);
        assert_eq!(value["timeout"], 100);
    }

    #[test]
    fn test_camel_case_use_colors_in_file() {
        let config = RunConfig::parse("[mocha]\nuseColors = false\ntimeout = 100\n").unwrap();
        assert!(!config.mocha.use_colors);
        assert!(config.mocha.extra.get("useColors").is_none());
        assert_eq!(config.mocha.to_page_options()["useColors"], false);
    }

    #[test]
    fn test_validate() {
        assert!(RunConfig::default().validate().is_err());
        assert!(RunConfig::new("not a url").validate().is_err());

        let mut config = RunConfig::new("file:///tmp/test.html");
        assert!(config.validate().is_ok());

        config.timeouts.mocha_run_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("mocha_run_ms"));
    }
}
