//! Page scenario runner
//!
//! Runs a `Runner` against a `MockPage` built from a YAML scenario and
//! checks the scenario's expectations against structured results.

use std::path::Path;

use colored::Colorize;
use tokio::time::{Duration, Instant};

use crate::common::{Error, Result};
use crate::runner::capture::SharedBuffer;
use crate::runner::{HostOutput, Platform, RunEvent, RunOutcome, Runner};

use super::config::{OutcomeExpectation, PageScenario};
use super::mock::{MockPage, MockRecorder};

/// Everything a scenario run produced
#[derive(Debug)]
pub struct ScenarioRun {
    pub name: String,
    pub outcome: RunOutcome,
    /// Host output after the capture was released
    pub output: String,
    /// Every event the host received, in order
    pub events: Vec<RunEvent>,
    /// Virtual time from `run()` to its return
    pub elapsed: Duration,
    pub recorder: MockRecorder,
}

impl ScenarioRun {
    pub fn logs(&self) -> usize {
        self.events.iter().filter(|e| !e.is_terminal()).count()
    }

    pub fn terminal_events(&self) -> usize {
        self.events.iter().filter(|e| e.is_terminal()).count()
    }
}

/// Run a page scenario from a YAML file and check its expectations
pub async fn run_scenario(path: &Path, platform: Platform) -> Result<ScenarioRun> {
    let scenario = PageScenario::load(path)?;
    let run = execute(&scenario, platform).await?;
    if let Some(expect) = &scenario.expect {
        check(&run, expect)?;
    }
    println!("  {} {}", "✓".green(), scenario.name);
    Ok(run)
}

/// Run a parsed scenario without checking expectations
pub async fn execute(scenario: &PageScenario, platform: Platform) -> Result<ScenarioRun> {
    println!(
        "\n{} {}",
        "Running Scenario:".blue().bold(),
        scenario.name.white().bold()
    );
    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }

    let page = MockPage::new(scenario.page.clone());
    let recorder = page.recorder();
    let sink = SharedBuffer::new();

    let mut runner = Runner::new(scenario.run_config())?
        .with_output(HostOutput::new(sink.clone()))
        .with_platform(platform);
    let mut events_rx = runner
        .take_event_receiver()
        .ok_or_else(|| Error::Internal("event receiver already taken".to_string()))?;
    runner.connect_with(Box::new(page))?;

    let started = Instant::now();
    let outcome = runner.run().await?;
    let elapsed = started.elapsed();
    runner.teardown().await;

    let mut events = Vec::new();
    while let Ok(event) = events_rx.try_recv() {
        events.push(event);
    }

    Ok(ScenarioRun {
        name: scenario.name.clone(),
        outcome,
        output: sink.contents(),
        events,
        elapsed,
        recorder,
    })
}

/// Compare a run against expectations
pub fn check(run: &ScenarioRun, expect: &OutcomeExpectation) -> Result<()> {
    let counts = [
        ("passes", expect.passes, run.outcome.result().map(|r| r.passes)),
        ("failures", expect.failures, run.outcome.result().map(|r| r.failures)),
        ("pending", expect.pending, run.outcome.result().map(|r| r.pending)),
    ];
    for (name, expected, actual) in counts {
        if let Some(expected) = expected {
            if actual != Some(expected) {
                return Err(Error::TestAssertion(format!(
                    "{}: expected {} {}, got {:?}",
                    run.name, name, expected, run.outcome
                )));
            }
        }
    }

    if let Some(expected) = &expect.failure {
        if run.outcome.failure() != Some(expected.as_str()) {
            return Err(Error::TestAssertion(format!(
                "{}: expected failure '{}', got {:?}",
                run.name, expected, run.outcome
            )));
        }
    }

    if let Some(substr) = &expect.failure_contains {
        if !run.outcome.failure().is_some_and(|m| m.contains(substr.as_str())) {
            return Err(Error::TestAssertion(format!(
                "{}: expected failure containing '{}', got {:?}",
                run.name, substr, run.outcome
            )));
        }
    }

    if let Some(substr) = &expect.output_contains {
        if !run.output.contains(substr.as_str()) {
            return Err(Error::TestAssertion(format!(
                "{}: output does not contain '{}'. Got: '{}'",
                run.name, substr, run.output
            )));
        }
    }

    if let Some(substr) = &expect.output_excludes {
        if run.output.contains(substr.as_str()) {
            return Err(Error::TestAssertion(format!(
                "{}: output unexpectedly contains '{}'",
                run.name, substr
            )));
        }
    }

    if let Some(logs) = expect.logs {
        if run.logs() != logs {
            return Err(Error::TestAssertion(format!(
                "{}: expected {} log events, got {:?}",
                run.name, logs, run.events
            )));
        }
    }

    if let Some(ms) = expect.within_ms {
        if run.elapsed > Duration::from_millis(ms) {
            return Err(Error::TestAssertion(format!(
                "{}: run took {:?}, expected at most {}ms",
                run.name, run.elapsed, ms
            )));
        }
    }

    if run.terminal_events() != 1 {
        return Err(Error::TestAssertion(format!(
            "{}: expected exactly one terminal event, got {:?}",
            run.name, run.events
        )));
    }

    Ok(())
}
