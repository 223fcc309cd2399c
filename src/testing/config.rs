//! Page scenario configuration types
//!
//! Defines the data structures for deserializing YAML page scenarios: how
//! a simulated mocha page behaves over time, which run options to use,
//! and what the run should produce.

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

use crate::common::config::{ConfigOverrides, RunConfig};
use crate::common::{Error, Result};

/// A complete page scenario loaded from a YAML file
#[derive(Deserialize, Debug, Clone)]
pub struct PageScenario {
    /// Name of the scenario
    pub name: String,
    /// Optional description of what the scenario verifies
    pub description: Option<String>,
    /// Run options that differ from the defaults
    #[serde(default)]
    pub options: ScenarioOptions,
    /// How the simulated page behaves
    #[serde(default)]
    pub page: PageScript,
    /// What the run should produce
    pub expect: Option<OutcomeExpectation>,
}

impl PageScenario {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read page scenario '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse page scenario: {}", e)))
    }

    /// Run configuration for this scenario
    pub fn run_config(&self) -> RunConfig {
        let o = &self.options;
        RunConfig::new("http://mock.test/index.html").apply(ConfigOverrides {
            ignore_console: Some(o.ignore_console),
            ignore_exceptions: Some(o.ignore_exceptions),
            ignore_resource_errors: Some(o.ignore_resource_errors),
            mocha_load_ms: o.mocha_load_ms,
            mocha_run_ms: o.mocha_run_ms,
            run_ms: o.run_ms,
            reporter: o.reporter.clone(),
            ..Default::default()
        })
    }
}

/// Run options a scenario may set
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ScenarioOptions {
    #[serde(default)]
    pub ignore_console: bool,
    #[serde(default)]
    pub ignore_exceptions: bool,
    #[serde(default)]
    pub ignore_resource_errors: bool,
    pub mocha_load_ms: Option<u64>,
    pub mocha_run_ms: Option<u64>,
    pub run_ms: Option<u64>,
    pub reporter: Option<String>,
}

/// Timeline of a simulated page, in milliseconds after navigation
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PageScript {
    /// When `Page.loadEventFired` is sent; `~` for never
    pub load_after_ms: Option<u64>,
    /// From when the probe sees `window.mocha`
    pub mocha_after_ms: Option<u64>,
    /// When `mocha.run()` is called
    pub run_after_ms: Option<u64>,
    /// When and how mocha finishes
    pub finish: Option<FinishStep>,
    /// Other page events
    pub events: Vec<PageEvent>,
    /// `errorText` returned by `Page.navigate`
    pub navigation_error: Option<String>,
    /// When the DevTools connection drops
    pub disconnect_after_ms: Option<u64>,
    /// When the page crashes
    pub crash_after_ms: Option<u64>,
}

impl Default for PageScript {
    fn default() -> Self {
        Self {
            load_after_ms: Some(10),
            mocha_after_ms: None,
            run_after_ms: None,
            finish: None,
            events: Vec::new(),
            navigation_error: None,
            disconnect_after_ms: None,
            crash_after_ms: None,
        }
    }
}

/// mocha's `end`
#[derive(Deserialize, Debug, Clone, Default)]
pub struct FinishStep {
    pub after_ms: u64,
    #[serde(default)]
    pub passes: u64,
    #[serde(default)]
    pub failures: u64,
    #[serde(default)]
    pub pending: u64,
    #[serde(default)]
    pub duration: f64,
    /// Send the end signal this many extra times
    #[serde(default)]
    pub repeat: u32,
}

/// One scripted page event; every field that is set is emitted, in field order
#[derive(Deserialize, Debug, Clone, Default)]
pub struct PageEvent {
    pub at_ms: u64,
    /// `console.log` with one string argument
    pub console: Option<String>,
    /// `console.log` with raw `RemoteObject` arguments
    pub console_args: Option<Vec<Value>>,
    /// Reporter output through mocha's stdout shim
    pub stdout: Option<String>,
    /// Uncaught exception description
    pub exception: Option<String>,
    /// `Network.loadingFailed`
    pub resource_failed: Option<ResourceFailure>,
    /// `Network.responseReceived` with an error status
    pub http_error: Option<HttpError>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ResourceFailure {
    pub url: String,
    #[serde(default = "default_net_error")]
    pub reason: String,
}

fn default_net_error() -> String {
    "net::ERR_FILE_NOT_FOUND".to_string()
}

#[derive(Deserialize, Debug, Clone)]
pub struct HttpError {
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
}

/// Expectations for a run's outcome
#[derive(Deserialize, Debug, Clone, Default)]
pub struct OutcomeExpectation {
    pub passes: Option<u64>,
    pub failures: Option<u64>,
    pub pending: Option<u64>,
    /// Exact failure message
    pub failure: Option<String>,
    /// Substring of the failure message
    pub failure_contains: Option<String>,
    /// Substring of the host output
    pub output_contains: Option<String>,
    /// Substring that must not appear in the host output
    pub output_excludes: Option<String>,
    /// Number of non-fatal log events
    pub logs: Option<usize>,
    /// Virtual time the run may take at most
    pub within_ms: Option<u64>,
}
