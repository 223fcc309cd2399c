//! mocha-chrome - run Mocha browser tests headlessly in Chrome
//!
//! This library drives a Mocha test page to completion over the Chrome
//! DevTools Protocol and reports a single outcome: the run's results or
//! a failure message.

pub mod browser;
pub mod cdp;
pub mod cli;
pub mod commands;
pub mod common;
pub mod runner;
pub mod testing;

// Re-export commonly used types for tests
pub use common::config::RunConfig;
pub use common::{Error, Result};
pub use runner::{RunEvent, RunOutcome, RunResult, Runner};
