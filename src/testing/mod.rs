//! Scripted page testing
//!
//! Provides a mock page target driven by YAML scenarios, so the runner can
//! be exercised end to end on tokio's virtual clock without a browser.
//! Assertions are made against structured outcomes rather than output
//! strings wherever possible.

mod config;
mod mock;
mod runner;

pub use config::*;
pub use mock::{MockPage, MockRecorder};
pub use runner::{check, execute, run_scenario, ScenarioRun};
