//! Error types for mocha-chrome
//!
//! The run-failure variants double as the host-visible failure messages,
//! so their `Display` text is part of the public contract.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mocha-chrome
#[derive(Error, Debug)]
pub enum Error {
    // === Browser Errors ===
    #[error("Chrome not found. Searched: {searched}. Set CHROME_PATH or pass --chrome-path")]
    BrowserNotFound { searched: String },

    #[error("Chrome failed to start: {0}")]
    BrowserLaunchFailed(String),

    #[error("Chrome did not report a DevTools endpoint within {0}ms")]
    BrowserLaunchTimeout(u64),

    #[error("No debuggable page target found at {0}")]
    TargetNotFound(String),

    // === CDP Errors ===
    #[error("Failed to connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("CDP protocol error: {0}")]
    CdpProtocol(String),

    #[error("CDP command '{method}' failed: {message}")]
    CdpCommandFailed { method: String, message: String },

    #[error("CDP command '{method}' timed out after {timeout_ms}ms")]
    CdpTimeout { method: String, timeout_ms: u64 },

    // === Session Errors ===
    #[error("No session. Call connect() before run()")]
    NotConnected,

    #[error("Cannot {action} while the runner is {state}")]
    InvalidState { action: String, state: String },

    // === Run Failures ===
    #[error("The page did not finish loading within {0}ms.")]
    PageLoadTimeout(u64),

    #[error("mocha was not found in the page within {0}ms of the page loading.")]
    MochaNotFound(u64),

    #[error("mocha.run() was not called within {0}ms of the page loading.")]
    MochaRunNotCalled(u64),

    #[error("mocha did not finish within {0}ms of mocha.run() being called.")]
    MochaRunTimeout(u64),

    #[error("Uncaught exception in page: {0}")]
    PageException(String),

    #[error("Failed to load resource {url}: {reason}")]
    ResourceLoadFailed { url: String, reason: String },

    #[error("Failed to navigate to {url}: {reason}")]
    NavigationFailed { url: String, reason: String },

    #[error("Lost connection to the browser: {0}")]
    TransportClosed(String),

    #[error("The run was cancelled before mocha finished.")]
    Cancelled,

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),

    // === Test Errors ===
    #[error("Test assertion failed: {0}")]
    TestAssertion(String),
}

impl Error {
    /// Create a browser not found error with the searched locations
    pub fn browser_not_found<S: AsRef<str>>(searched: &[S]) -> Self {
        Self::BrowserNotFound {
            searched: searched.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", "),
        }
    }

    /// Create a CDP command failed error
    pub fn cdp_command_failed(method: &str, message: &str) -> Self {
        Self::CdpCommandFailed {
            method: method.to_string(),
            message: message.to_string(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Whether this error is a configuration problem (rejected before a session opens)
    ///
    /// Unreadable config files and missing test pages count as configuration.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::ConfigParse(_) | Self::FileRead { .. })
    }
}
