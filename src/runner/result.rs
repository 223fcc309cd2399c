//! Run results and the terminal latch
//!
//! `ResultAggregator` turns mocha's end-of-run stats into a `RunResult`;
//! `Latch` is the single-assignment cell every terminal signal goes
//! through, so the first one wins and the rest are dropped.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Error, Result};

/// Final counts of a finished mocha run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub passes: u64,
    pub failures: u64,
    pub pending: u64,
    pub duration_ms: u64,
}

/// What a run produced: results, or a failure message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Ended(RunResult),
    Failure(String),
}

impl RunOutcome {
    /// The results, if mocha finished
    pub fn result(&self) -> Option<&RunResult> {
        match self {
            Self::Ended(result) => Some(result),
            Self::Failure(_) => None,
        }
    }

    /// The failure message, if the run failed
    pub fn failure(&self) -> Option<&str> {
        match self {
            Self::Ended(_) => None,
            Self::Failure(message) => Some(message),
        }
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Ended(result) if result.failures == 0 => 0,
            _ => 1,
        }
    }
}

impl From<Error> for RunOutcome {
    fn from(e: Error) -> Self {
        Self::Failure(e.to_string())
    }
}

/// Stats as the page reports them; mocha's numbers may be missing or
/// fractional (duration)
#[derive(Debug, Default, Deserialize)]
struct PageStats {
    passes: Option<f64>,
    failures: Option<f64>,
    pending: Option<f64>,
    duration: Option<f64>,
}

fn count(value: Option<f64>) -> u64 {
    value
        .filter(|n| n.is_finite() && *n > 0.0)
        .map(|n| n.round() as u64)
        .unwrap_or(0)
}

/// Collects the one "tests finished" signal
#[derive(Debug, Default)]
pub struct ResultAggregator {
    result: Option<RunResult>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept mocha's end stats
    ///
    /// Returns the result the first time; later signals return `None`.
    pub fn accept(&mut self, stats: &Value) -> Result<Option<RunResult>> {
        if self.result.is_some() {
            tracing::debug!("Ignoring repeated end signal");
            return Ok(None);
        }

        if !stats.is_object() {
            return Err(Error::CdpProtocol(format!(
                "mocha reported malformed stats: {}",
                stats
            )));
        }
        let raw: PageStats = serde_json::from_value(stats.clone()).map_err(|e| {
            Error::CdpProtocol(format!("mocha reported malformed stats: {}", e))
        })?;

        let result = RunResult {
            passes: count(raw.passes),
            failures: count(raw.failures),
            pending: count(raw.pending),
            duration_ms: count(raw.duration),
        };
        self.result = Some(result);
        Ok(Some(result))
    }

    pub fn result(&self) -> Option<RunResult> {
        self.result
    }
}

/// Single-assignment cell for the run's outcome
#[derive(Debug, Default)]
pub struct Latch {
    cell: OnceLock<RunOutcome>,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to fix the outcome. Returns false if one was already latched.
    pub fn latch(&self, outcome: RunOutcome) -> bool {
        match self.cell.set(outcome) {
            Ok(()) => true,
            Err(late) => {
                tracing::debug!(?late, "Outcome already latched, discarding");
                false
            }
        }
    }

    pub fn get(&self) -> Option<&RunOutcome> {
        self.cell.get()
    }

    pub fn is_latched(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn into_inner(self) -> Option<RunOutcome> {
        self.cell.into_inner()
    }
}
