//! End-to-end tests for the runner against scripted pages
//!
//! Each scenario in `tests/fixtures/pages/` describes how a mocha page
//! behaves over time and what the run must produce. Everything runs on
//! tokio's paused clock, so deadlines are exact and the tests are fast.

use std::path::PathBuf;

use async_trait::async_trait;
use mocha_chrome::cdp::{Event, Transport};
use mocha_chrome::runner::{HostOutput, Platform, RunEvent, RunnerState};
use mocha_chrome::testing::{
    check, execute, run_scenario, FinishStep, MockPage, PageEvent, PageScenario, PageScript,
    ScenarioRun,
};
use mocha_chrome::{Error, RunConfig, RunOutcome, RunResult, Runner};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("pages")
        .join(format!("{}.yml", name))
}

async fn scenario(name: &str) -> ScenarioRun {
    run_scenario(&fixture(name), Platform::Other)
        .await
        .unwrap_or_else(|e| panic!("scenario {} failed: {}", name, e))
}

fn result(run: &ScenarioRun) -> RunResult {
    *run.outcome
        .result()
        .unwrap_or_else(|| panic!("expected results, got {:?}", run.outcome))
}

// === Liveness ===

#[tokio::test(start_paused = true)]
async fn test_mocha_not_found() {
    let run = scenario("no-mocha").await;
    // load at 10ms plus the 1000ms deadline
    assert_eq!(run.elapsed, Duration::from_millis(1010));
}

#[tokio::test(start_paused = true)]
async fn test_mocha_run_not_called() {
    let run = scenario("no-run").await;
    // measured from detection, not from load
    assert!(run.elapsed > Duration::from_millis(1010));
    assert_eq!(run.terminal_events(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_liveness_failures_are_distinct() {
    let not_found = scenario("no-mocha").await;
    let not_run = scenario("no-run").await;
    assert_ne!(not_found.outcome, not_run.outcome);
}

#[tokio::test(start_paused = true)]
async fn test_custom_liveness_deadlines() {
    let mut scenario = PageScenario::parse("name: short deadline\n").unwrap();
    scenario.options.mocha_load_ms = Some(250);

    let run = execute(&scenario, Platform::Other).await.unwrap();
    assert_eq!(
        run.outcome.failure(),
        Some("mocha was not found in the page within 250ms of the page loading.")
    );
    assert_eq!(run.elapsed, Duration::from_millis(260));
}

#[tokio::test(start_paused = true)]
async fn test_run_ceiling() {
    scenario("never-finishes").await;
}

#[tokio::test(start_paused = true)]
async fn test_page_never_loads() {
    scenario("never-loads").await;
}

/// A page that loads at once and then is too busy to answer evaluations
struct BusyPage {
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: Option<mpsc::UnboundedReceiver<Event>>,
    stall: Duration,
    /// Answer with a request timeout after the stall, like a real connection would
    times_out: bool,
}

impl BusyPage {
    fn new(stall: Duration, times_out: bool) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self { events_tx, events_rx: Some(events_rx), stall, times_out }
    }
}

#[async_trait]
impl Transport for BusyPage {
    async fn call(&mut self, method: &str, _params: Value) -> mocha_chrome::Result<Value> {
        match method {
            "Page.navigate" => {
                let _ = self.events_tx.send(Event::LoadEventFired);
                Ok(json!({ "frameId": "main" }))
            }
            "Runtime.evaluate" => {
                tokio::time::sleep(self.stall).await;
                if self.times_out {
                    return Err(Error::CdpTimeout {
                        method: method.to_string(),
                        timeout_ms: self.stall.as_millis() as u64,
                    });
                }
                Ok(json!({ "result": { "type": "object", "value": { "mocha": false, "started": false } } }))
            }
            _ => Ok(json!({})),
        }
    }

    fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<Event>> {
        self.events_rx.take()
    }

    async fn close(&mut self) -> mocha_chrome::Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_busy_page_fails_at_load_deadline() {
    // (evaluate stall, answers with a request timeout)
    let cases = [(Duration::from_secs(5), false), (Duration::from_millis(300), true)];

    for (stall, times_out) in cases {
        let mut runner = Runner::new(RunConfig::new("http://mock.test/index.html"))
            .unwrap()
            .with_output(HostOutput::new(std::io::sink()));
        runner
            .connect_with(Box::new(BusyPage::new(stall, times_out)))
            .unwrap();

        let started = Instant::now();
        let outcome = runner.run().await.unwrap();
        assert_eq!(
            outcome.failure(),
            Some("mocha was not found in the page within 1000ms of the page loading."),
            "case {:?}",
            (stall, times_out)
        );
        assert_eq!(started.elapsed(), Duration::from_millis(1000), "case {:?}", (stall, times_out));
    }
}

// === Results ===

#[tokio::test(start_paused = true)]
async fn test_one_passing_test() {
    let run = scenario("test").await;
    assert_eq!(
        result(&run),
        RunResult { passes: 1, failures: 0, pending: 0, duration_ms: 4 }
    );
    assert_eq!(run.events, vec![RunEvent::Ended(result(&run))]);
    assert_eq!(run.outcome.exit_code(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_started_before_page_load() {
    let run = scenario("inline-run").await;
    assert_eq!(result(&run).passes, 1);
    assert_eq!(run.terminal_events(), 1);
    assert!(run.elapsed < Duration::from_millis(150));
}

#[tokio::test(start_paused = true)]
async fn test_one_failing_test() {
    let run = scenario("fail").await;
    assert_eq!(result(&run).failures, 1);
    assert_eq!(run.outcome.exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_async_failures() {
    let run = scenario("fail-async").await;
    assert_eq!(result(&run).failures, 3);
    assert_eq!(result(&run).duration_ms, 361);
}

#[tokio::test(start_paused = true)]
async fn test_mixed_results() {
    scenario("mixed").await;
}

#[tokio::test(start_paused = true)]
async fn test_runner_modified_by_page() {
    let run = scenario("runner-mod").await;
    // output after the end signal is not part of the run
    assert!(!run.output.contains("page saw end"));
}

#[tokio::test(start_paused = true)]
async fn test_reporter_options_reach_page() {
    let run = scenario("reporter").await;
    let params = run
        .recorder
        .params("Page.addScriptToEvaluateOnNewDocument")
        .expect("client script registered");
    let source = params["source"].as_str().unwrap();
    assert!(source.contains(r#""reporter":"xunit""#));
    assert!(source.contains(r#""useColors":true"#));
}

#[tokio::test(start_paused = true)]
async fn test_local_storage_cleared_before_navigation() {
    let run = scenario("local-storage").await;
    let methods = run.recorder.methods();
    let cleared = methods
        .iter()
        .position(|m| m == "Storage.clearDataForOrigin")
        .expect("localStorage cleared");
    let navigated = methods.iter().position(|m| m == "Page.navigate").unwrap();
    assert!(cleared < navigated);

    let params = run.recorder.params("Storage.clearDataForOrigin").unwrap();
    assert_eq!(params["origin"], "http://mock.test");
    assert_eq!(params["storageTypes"], "local_storage");
}

#[tokio::test(start_paused = true)]
async fn test_circular_console_object() {
    scenario("circular").await;
}

// === Event filtering ===

#[tokio::test(start_paused = true)]
async fn test_uncaught_exception_is_fatal() {
    let run = scenario("exception").await;
    assert_eq!(run.outcome.exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ignored_exception_is_logged() {
    let run = scenario("exception-ignored").await;
    assert!(matches!(
        &run.events[0],
        RunEvent::Log(event) if !event.is_fatal() && event.to_string().contains("Error: harmless")
    ));
}

#[tokio::test(start_paused = true)]
async fn test_resource_failures() {
    scenario("resource-error").await;
    scenario("http-error").await;
    scenario("resource-ignored").await;
}

#[tokio::test(start_paused = true)]
async fn test_console_ignored() {
    let run = scenario("ignore-console").await;
    assert_eq!(run.output, "");
}

#[tokio::test(start_paused = true)]
async fn test_console_relayed_in_order() {
    let run = scenario("test").await;
    let first = run.output.find("✓ passes").unwrap();
    let second = run.output.find("1 passing").unwrap();
    assert!(first < second);
}

// === Transport ===

#[tokio::test(start_paused = true)]
async fn test_navigation_error() {
    scenario("navigation-error").await;
}

#[tokio::test(start_paused = true)]
async fn test_connection_lost() {
    let run = scenario("disconnect").await;
    assert_eq!(run.recorder.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_page_crash() {
    scenario("crash").await;
}

// === Output correction ===

#[tokio::test(start_paused = true)]
async fn test_glyphs_other_platforms() {
    let scenario = PageScenario::load(&fixture("unicode")).unwrap();
    let run = execute(&scenario, Platform::Other).await.unwrap();
    check(&run, scenario.expect.as_ref().unwrap()).unwrap();
    assert_eq!(run.output, "  ✓ mis-decoded\n  ✓ intact\n");
}

#[tokio::test(start_paused = true)]
async fn test_glyphs_windows() {
    let scenario = PageScenario::load(&fixture("unicode")).unwrap();
    let run = execute(&scenario, Platform::Windows).await.unwrap();
    check(&run, scenario.expect.as_ref().unwrap()).unwrap();
    assert_eq!(run.output, "  √ mis-decoded\n  √ intact\n");
}

// === Terminal events ===

#[tokio::test(start_paused = true)]
async fn test_events_after_end_are_discarded() {
    let run = scenario("late-events").await;
    assert_eq!(run.events.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exactly_one_terminal_event_for_any_interleaving() {
    // (finish, exception, mocha load deadline) in ms; whichever comes first wins
    let cases = [
        (Some(50), Some(60), 1000, "ended"),
        (Some(60), Some(50), 1000, "exception"),
        (Some(50), Some(50), 1000, "ended"),
        // mocha is there at the first probe, so a tiny load deadline never fires
        (Some(900), None, 5, "ended"),
        (None, Some(500), 100, "exception"),
        (None, None, 100, "timeout"),
        (Some(50), None, 1000, "ended"),
    ];

    for (finish, exception, load_ms, winner) in cases {
        let page = PageScript {
            mocha_after_ms: Some(0),
            run_after_ms: Some(20),
            finish: finish.map(|after_ms| FinishStep { after_ms, passes: 1, ..Default::default() }),
            events: exception
                .map(|at_ms| PageEvent {
                    at_ms,
                    exception: Some("Error: boom".to_string()),
                    ..Default::default()
                })
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let mut scenario = PageScenario::parse("name: interleaving\n").unwrap();
        scenario.page = page;
        scenario.options.mocha_load_ms = Some(load_ms);
        scenario.options.run_ms = Some(1000);

        let run = execute(&scenario, Platform::Other).await.unwrap();
        assert_eq!(run.terminal_events(), 1, "case {:?}", (finish, exception, load_ms));

        let actual = match &run.outcome {
            RunOutcome::Ended(_) => "ended",
            RunOutcome::Failure(m) if m.starts_with("Uncaught exception") => "exception",
            RunOutcome::Failure(_) => "timeout",
        };
        assert_eq!(actual, winner, "case {:?}: {:?}", (finish, exception, load_ms), run.outcome);
    }
}

// === Runner lifecycle ===

fn runner_for(script: PageScript) -> (Runner, mocha_chrome::testing::MockRecorder) {
    let page = MockPage::new(script);
    let recorder = page.recorder();
    let mut runner = Runner::new(RunConfig::new("http://mock.test/index.html"))
        .unwrap()
        .with_output(HostOutput::new(std::io::sink()));
    runner.connect_with(Box::new(page)).unwrap();
    (runner, recorder)
}

fn passing_page() -> PageScript {
    PageScript {
        mocha_after_ms: Some(20),
        run_after_ms: Some(30),
        finish: Some(FinishStep { after_ms: 50, passes: 1, ..Default::default() }),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_teardown_twice() {
    let (mut runner, recorder) = runner_for(passing_page());
    let outcome = runner.run().await.unwrap();
    assert_eq!(runner.state(), RunnerState::Finalized);

    runner.teardown().await;
    runner.teardown().await;

    assert_eq!(runner.outcome(), Some(&outcome));
    assert_eq!(recorder.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_is_not_reusable() {
    let (mut runner, _) = runner_for(passing_page());
    runner.run().await.unwrap();
    let err = runner.run().await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_connect_twice_is_rejected() {
    let (mut runner, _) = runner_for(passing_page());
    let err = runner
        .connect_with(Box::new(MockPage::new(PageScript::default())))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_run() {
    let (mut runner, recorder) = runner_for(PageScript {
        mocha_after_ms: Some(20),
        run_after_ms: Some(30),
        ..Default::default()
    });
    let mut events = runner.take_event_receiver().unwrap();

    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
    });

    let outcome = runner.run().await.unwrap();
    assert_eq!(
        outcome.failure(),
        Some("The run was cancelled before mocha finished.")
    );
    assert_eq!(recorder.close_count(), 1);
    assert_eq!(
        events.try_recv().unwrap(),
        RunEvent::Failure("The run was cancelled before mocha finished.".to_string())
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_output_restored_after_failure() {
    let sink = mocha_chrome::runner::capture::SharedBuffer::new();
    let host = HostOutput::new(sink.clone());

    let mut runner = Runner::new(RunConfig::new("http://mock.test/index.html"))
        .unwrap()
        .with_output(host.clone());
    runner
        .connect_with(Box::new(MockPage::new(PageScript {
            events: vec![PageEvent {
                at_ms: 5,
                console: Some("before the crash".to_string()),
                ..Default::default()
            }],
            crash_after_ms: Some(10),
            ..Default::default()
        })))
        .unwrap();

    let outcome = runner.run().await.unwrap();
    assert!(outcome.failure().is_some());

    host.write_str("host again\n").unwrap();
    assert_eq!(sink.contents(), "before the crash\nhost again\n");
}

#[tokio::test(start_paused = true)]
async fn test_domains_enabled_before_navigation() {
    let (mut runner, recorder) = runner_for(passing_page());
    runner.run().await.unwrap();

    let methods = recorder.methods();
    let navigate = methods.iter().position(|m| m == "Page.navigate").unwrap();
    for required in [
        "Runtime.enable",
        "Page.enable",
        "Network.enable",
        "Runtime.addBinding",
        "Page.addScriptToEvaluateOnNewDocument",
    ] {
        let at = methods.iter().position(|m| m == required).unwrap();
        assert!(at < navigate, "{} after navigation", required);
    }
    assert_eq!(
        recorder.params("Runtime.addBinding").unwrap()["name"],
        Value::from("__mochaChromeSignal")
    );
}
