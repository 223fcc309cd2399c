//! Liveness watchdog
//!
//! Two checks run one after the other once the page has loaded: `mocha`
//! must appear within the load deadline, then `mocha.run()` must be called
//! within the run deadline. After that the overall run ceiling applies
//! until mocha reports its end. Every waiting state owns exactly one
//! deadline and states only move forward.

use serde::Deserialize;
use tokio::time::{Duration, Instant};

use crate::common::config::Timeouts;
use crate::common::{Error, Result};

/// Expression evaluated in the page on every poll
pub const PROBE_EXPRESSION: &str = "({ \
    mocha: typeof window.mocha !== 'undefined' && window.mocha !== null, \
    started: !!(window.__mochaChrome && window.__mochaChrome.started) \
})";

/// Liveness of the page's test framework
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LivenessState {
    AwaitingFramework,
    AwaitingRun,
    Running,
    Completed,
    TimedOut,
}

impl std::fmt::Display for LivenessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingFramework => write!(f, "awaiting mocha"),
            Self::AwaitingRun => write!(f, "awaiting mocha.run()"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// One answer to `PROBE_EXPRESSION`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Probe {
    #[serde(default)]
    pub mocha: bool,
    #[serde(default)]
    pub started: bool,
}

#[derive(Debug)]
pub struct Watchdog {
    state: LivenessState,
    load_timeout: Duration,
    run_timeout: Duration,
    ceiling: Duration,
    /// Deadline owned by the current state; `None` before the page loads
    deadline: Option<Instant>,
}

impl Watchdog {
    pub fn new(timeouts: &Timeouts) -> Self {
        Self {
            state: LivenessState::AwaitingFramework,
            load_timeout: timeouts.mocha_load(),
            run_timeout: timeouts.mocha_run(),
            ceiling: timeouts.run(),
            deadline: None,
        }
    }

    pub fn state(&self) -> LivenessState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the page has loaded and the watchdog is counting
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Whether a poll could move the watchdog forward
    pub fn needs_probe(&self) -> bool {
        self.is_armed()
            && matches!(
                self.state,
                LivenessState::AwaitingFramework | LivenessState::AwaitingRun
            )
    }

    /// The page fired its load event; start the first deadline
    ///
    /// Later load events (in-page navigation) do not restart the clock.
    pub fn arm(&mut self, now: Instant) {
        if self.state == LivenessState::AwaitingFramework && self.deadline.is_none() {
            tracing::debug!(timeout_ms = self.load_timeout.as_millis() as u64, "Waiting for mocha");
            self.deadline = Some(now + self.load_timeout);
        }
    }

    /// Feed a probe result
    pub fn observe(&mut self, probe: Probe, now: Instant) -> Result<LivenessState> {
        if probe.started {
            self.mark_started(now);
        } else if probe.mocha && self.state == LivenessState::AwaitingFramework {
            tracing::debug!(
                timeout_ms = self.run_timeout.as_millis() as u64,
                "mocha found, waiting for mocha.run()"
            );
            self.state = LivenessState::AwaitingRun;
            self.deadline = Some(now + self.run_timeout);
        }
        self.check(now)
    }

    /// `mocha.run()` was called; only the run ceiling applies from here
    pub fn mark_started(&mut self, now: Instant) {
        if self.state < LivenessState::Running {
            tracing::debug!("mocha.run() called");
            self.state = LivenessState::Running;
            self.deadline = Some(now + self.ceiling);
        }
    }

    /// mocha reported its end
    pub fn complete(&mut self) {
        if self.state != LivenessState::TimedOut {
            self.state = LivenessState::Completed;
            self.deadline = None;
        }
    }

    /// Fail if the current state's deadline has passed
    pub fn check(&mut self, now: Instant) -> Result<LivenessState> {
        let Some(deadline) = self.deadline else {
            return Ok(self.state);
        };
        if now < deadline {
            return Ok(self.state);
        }

        let err = match self.state {
            LivenessState::AwaitingFramework => {
                Error::MochaNotFound(self.load_timeout.as_millis() as u64)
            }
            LivenessState::AwaitingRun => Error::MochaRunNotCalled(self.run_timeout.as_millis() as u64),
            LivenessState::Running => Error::MochaRunTimeout(self.ceiling.as_millis() as u64),
            LivenessState::Completed | LivenessState::TimedOut => return Ok(self.state),
        };
        self.state = LivenessState::TimedOut;
        self.deadline = None;
        Err(err)
    }
}
