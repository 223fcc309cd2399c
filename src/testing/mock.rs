//! Scripted page transport
//!
//! `MockPage` stands in for a browser page target. Once navigated it plays
//! its `PageScript` timeline on tokio's clock, so tests under paused time
//! are deterministic. Liveness probes are answered from the same timeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::cdp::{Event, EventMessage, Transport};
use crate::common::{Error, Result};
use crate::runner::BINDING_NAME;

use super::config::PageScript;

/// What a `MockPage` saw; stays readable after the page is handed to a runner
#[derive(Debug, Clone, Default)]
pub struct MockRecorder {
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    closes: Arc<AtomicUsize>,
}

impl MockRecorder {
    /// Methods called, in order
    pub fn methods(&self) -> Vec<String> {
        self.lock().iter().map(|(method, _)| method.clone()).collect()
    }

    /// Parameters of the first call to `method`
    pub fn params(&self, method: &str) -> Option<Value> {
        self.lock()
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
    }

    pub fn count(&self, method: &str) -> usize {
        self.lock().iter().filter(|(m, _)| m == method).count()
    }

    /// How many times `close` reached the transport
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn record(&self, method: &str, params: &Value) {
        self.lock().push((method.to_string(), params.clone()));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, Value)>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A simulated mocha page
pub struct MockPage {
    script: PageScript,
    recorder: MockRecorder,
    event_tx: Option<mpsc::UnboundedSender<Event>>,
    event_rx: Option<mpsc::UnboundedReceiver<Event>>,
    navigated_at: Option<Instant>,
    timeline: Option<JoinHandle<()>>,
    closed: bool,
}

impl MockPage {
    pub fn new(script: PageScript) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            script,
            recorder: MockRecorder::default(),
            event_tx: Some(tx),
            event_rx: Some(rx),
            navigated_at: None,
            timeline: None,
            closed: false,
        }
    }

    pub fn recorder(&self) -> MockRecorder {
        self.recorder.clone()
    }

    fn probe(&self) -> Value {
        let elapsed = self.navigated_at.map(|at| at.elapsed());
        let reached = |ms: Option<u64>| match (elapsed, ms) {
            (Some(elapsed), Some(ms)) => elapsed >= Duration::from_millis(ms),
            _ => false,
        };
        let loaded = reached(self.script.load_after_ms);
        json!({
            "result": {
                "type": "object",
                "value": {
                    "mocha": loaded && reached(self.script.mocha_after_ms),
                    "started": reached(self.script.run_after_ms),
                }
            }
        })
    }

    fn start_timeline(&mut self) {
        let Some(tx) = self.event_tx.take() else {
            return;
        };
        let start = Instant::now();
        self.navigated_at = Some(start);

        let steps = timeline(&self.script);
        let disconnect = self.script.disconnect_after_ms;

        self.timeline = Some(tokio::spawn(async move {
            for (at_ms, message) in steps {
                if disconnect.is_some_and(|d| d <= at_ms) {
                    break;
                }
                tokio::time::sleep_until(start + Duration::from_millis(at_ms)).await;
                if tx.send(Event::from_message(&message)).is_err() {
                    return;
                }
            }
            match disconnect {
                Some(ms) => {
                    tokio::time::sleep_until(start + Duration::from_millis(ms)).await;
                    drop(tx);
                }
                // the connection stays up until closed
                None => {
                    std::future::pending::<()>().await;
                    drop(tx);
                }
            }
        }));
    }
}

/// Every event of a script, ordered by time; lifecycle events go first on ties
fn timeline(script: &PageScript) -> Vec<(u64, EventMessage)> {
    let mut steps = Vec::new();
    let event = |method: &str, params: Value| EventMessage {
        method: method.to_string(),
        params: Some(params),
    };
    let signal = |payload: Value| {
        event(
            "Runtime.bindingCalled",
            json!({ "name": BINDING_NAME, "payload": payload.to_string(), "executionContextId": 1 }),
        )
    };

    if let Some(ms) = script.load_after_ms {
        steps.push((ms, event("Page.loadEventFired", json!({ "timestamp": 1.0 }))));
        if let Some(run) = script.run_after_ms {
            // an inline `mocha.run()` signals before the load event
            steps.push((run, signal(json!({ "event": "started" }))));
        }
    }
    if let Some(finish) = &script.finish {
        let stats = json!({
            "event": "ended",
            "data": {
                "passes": finish.passes,
                "failures": finish.failures,
                "pending": finish.pending,
                "duration": finish.duration,
            }
        });
        for _ in 0..=finish.repeat {
            steps.push((finish.after_ms, signal(stats.clone())));
        }
    }
    if let Some(ms) = script.crash_after_ms {
        steps.push((ms, event("Inspector.targetCrashed", json!({}))));
    }

    for (i, step) in script.events.iter().enumerate() {
        if let Some(text) = &step.console {
            let args = json!([{ "type": "string", "value": text }]);
            steps.push((step.at_ms, console(args)));
        }
        if let Some(args) = &step.console_args {
            steps.push((step.at_ms, console(Value::Array(args.clone()))));
        }
        if let Some(text) = &step.stdout {
            steps.push((step.at_ms, signal(json!({ "event": "stdout", "data": text }))));
        }
        if let Some(description) = &step.exception {
            steps.push((
                step.at_ms,
                event(
                    "Runtime.exceptionThrown",
                    json!({
                        "timestamp": 1.0,
                        "exceptionDetails": {
                            "exceptionId": i + 1,
                            "text": "Uncaught",
                            "lineNumber": 0,
                            "columnNumber": 0,
                            "exception": { "type": "object", "subtype": "error", "description": description }
                        }
                    }),
                ),
            ));
        }
        if let Some(failure) = &step.resource_failed {
            let request_id = format!("req-{}", i);
            steps.push((
                step.at_ms,
                event(
                    "Network.requestWillBeSent",
                    json!({ "requestId": request_id, "request": { "url": failure.url } }),
                ),
            ));
            steps.push((
                step.at_ms,
                event(
                    "Network.loadingFailed",
                    json!({ "requestId": request_id, "errorText": failure.reason, "canceled": false }),
                ),
            ));
        }
        if let Some(http) = &step.http_error {
            steps.push((
                step.at_ms,
                event(
                    "Network.responseReceived",
                    json!({
                        "requestId": format!("http-{}", i),
                        "response": { "url": http.url, "status": http.status, "statusText": http.status_text }
                    }),
                ),
            ));
        }
    }

    steps.sort_by_key(|(at_ms, _)| *at_ms);
    steps
}

fn console(args: Value) -> EventMessage {
    EventMessage {
        method: "Runtime.consoleAPICalled".to_string(),
        params: Some(json!({ "type": "log", "args": args, "executionContextId": 1, "timestamp": 1.0 })),
    }
}

#[async_trait]
impl Transport for MockPage {
    async fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        self.recorder.record(method, &params);
        if self.closed {
            return Err(Error::TransportClosed("connection already closed".to_string()));
        }

        match method {
            "Page.navigate" => match &self.script.navigation_error {
                Some(error) => Ok(json!({ "frameId": "main", "errorText": error })),
                None => {
                    self.start_timeline();
                    Ok(json!({ "frameId": "main", "loaderId": "1" }))
                }
            },
            "Runtime.evaluate" => Ok(self.probe()),
            "Page.addScriptToEvaluateOnNewDocument" => Ok(json!({ "identifier": "1" })),
            _ => Ok(json!({})),
        }
    }

    fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<Event>> {
        self.event_rx.take()
    }

    async fn close(&mut self) -> Result<()> {
        self.recorder.closes.fetch_add(1, Ordering::SeqCst);
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(timeline) = self.timeline.take() {
            timeline.abort();
        }
        Ok(())
    }
}

impl Drop for MockPage {
    fn drop(&mut self) {
        if let Some(timeline) = self.timeline.take() {
            timeline.abort();
        }
    }
}
