//! Run orchestration
//!
//! A `Runner` drives one page through
//! `Idle → Connected → Navigating → AwaitingLiveness → Executing → Finalized`
//! and reports exactly one terminal event: `Ended` with the results, or
//! `Failure` with a message. Page events, liveness probes, deadlines and
//! cancellation are multiplexed in a single loop, so the first terminal
//! signal is the one that gets latched.

pub mod capture;
pub mod relay;
pub mod result;
pub mod script;
pub mod session;
pub mod watchdog;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, Notify};
use tokio::time::{Instant, MissedTickBehavior};

use crate::cdp::{Event, Transport};
use crate::common::config::RunConfig;
use crate::common::{Error, Result};

pub use capture::{HostOutput, OutputCapture, Platform};
pub use relay::{FilteredEvent, Relay};
pub use result::{Latch, ResultAggregator, RunOutcome, RunResult};
pub use script::{PageSignal, BINDING_NAME};
pub use session::Session;
pub use watchdog::{LivenessState, Probe, Watchdog, PROBE_EXPRESSION};

/// Where a runner is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Connected,
    Navigating,
    AwaitingLiveness,
    Executing,
    Finalized,
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connected => write!(f, "connected"),
            Self::Navigating => write!(f, "navigating"),
            Self::AwaitingLiveness => write!(f, "awaiting liveness"),
            Self::Executing => write!(f, "executing"),
            Self::Finalized => write!(f, "finalized"),
        }
    }
}

/// Events delivered to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// A non-fatal page event (ignored exception or resource failure)
    Log(FilteredEvent),
    /// Terminal: mocha finished
    Ended(RunResult),
    /// Terminal: the run failed
    Failure(String),
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Log(_))
    }
}

impl From<&RunOutcome> for RunEvent {
    fn from(outcome: &RunOutcome) -> Self {
        match outcome {
            RunOutcome::Ended(result) => Self::Ended(*result),
            RunOutcome::Failure(message) => Self::Failure(message.clone()),
        }
    }
}

/// Lets the host abandon a run from another task
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Drives one mocha page to a single outcome
pub struct Runner {
    config: RunConfig,
    url: String,
    output: HostOutput,
    platform: Platform,
    state: RunnerState,
    session: Option<Session>,
    events_tx: mpsc::UnboundedSender<RunEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<RunEvent>>,
    cancel: CancelHandle,
    latch: Latch,
}

impl Runner {
    /// Create a runner; the configuration is rejected here, before any session exists
    pub fn new(config: RunConfig) -> Result<Self> {
        let url = config.validate()?.to_string();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            url,
            output: HostOutput::stdout(),
            platform: Platform::current(),
            state: RunnerState::Idle,
            session: None,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancelHandle::default(),
            latch: Latch::new(),
        })
    }

    /// Write reporter output somewhere other than stdout
    pub fn with_output(mut self, output: HostOutput) -> Self {
        self.output = output;
        self
    }

    /// Override the glyph handling platform
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// The latched outcome, once the run is over
    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.latch.get()
    }

    /// Take the host event stream (once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<RunEvent>> {
        self.events_rx.take()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Open a session to the configured browser
    pub async fn connect(&mut self) -> Result<()> {
        self.expect_state(RunnerState::Idle, "connect")?;
        let session = Session::open(&self.config).await?;
        self.attach(session);
        Ok(())
    }

    /// Use an already connected transport
    pub fn connect_with(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        self.expect_state(RunnerState::Idle, "connect")?;
        self.attach(Session::with_transport(transport));
        Ok(())
    }

    fn attach(&mut self, session: Session) {
        self.session = Some(session);
        self.state = RunnerState::Connected;
        tracing::debug!("Connected");
    }

    fn expect_state(&self, expected: RunnerState, action: &str) -> Result<()> {
        match self.state {
            s if s == expected => Ok(()),
            RunnerState::Idle => Err(Error::NotConnected),
            other => Err(Error::invalid_state(action, other)),
        }
    }

    /// Run the page to a terminal outcome
    ///
    /// Exactly one `Ended` or `Failure` event is sent per run. The output
    /// sink is restored and the session closed before this returns.
    /// `Err` is only returned when the runner is not in a state to run.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        self.expect_state(RunnerState::Connected, "run")?;

        let capture = if self.config.ignore.console {
            None
        } else {
            Some(OutputCapture::install(&self.output, self.platform))
        };

        let driven = match self.session.as_mut() {
            Some(session) => {
                let mut run = RunLoop {
                    session,
                    config: &self.config,
                    output: &self.output,
                    events_tx: &self.events_tx,
                    state: &mut self.state,
                };
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(Error::Cancelled),
                    result = run.drive(&self.url) => result,
                }
            }
            None => Err(Error::NotConnected),
        };

        let outcome = match driven {
            Ok(result) => {
                tracing::info!(
                    passes = result.passes,
                    failures = result.failures,
                    pending = result.pending,
                    "mocha finished"
                );
                RunOutcome::Ended(result)
            }
            Err(e) => {
                tracing::info!(error = %e, "Run failed");
                RunOutcome::from(e)
            }
        };
        self.latch.latch(outcome);
        self.state = RunnerState::Finalized;

        if let Some(capture) = capture {
            if let Err(e) = capture.release() {
                tracing::warn!(error = %e, "Failed to write captured output");
            }
        }
        self.close_session().await;

        let outcome = self
            .latch
            .get()
            .cloned()
            .ok_or_else(|| Error::Internal("run finished without an outcome".to_string()))?;
        let _ = self.events_tx.send(RunEvent::from(&outcome));
        Ok(outcome)
    }

    /// Release the session. Safe to call any number of times.
    pub async fn teardown(&mut self) {
        self.close_session().await;
        if self.state != RunnerState::Idle {
            self.state = RunnerState::Finalized;
        }
    }

    async fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("outcome", &self.latch.get())
            .finish()
    }
}

/// The parts of a runner one run borrows
struct RunLoop<'a> {
    session: &'a mut Session,
    config: &'a RunConfig,
    output: &'a HostOutput,
    events_tx: &'a mpsc::UnboundedSender<RunEvent>,
    state: &'a mut RunnerState,
}

impl RunLoop<'_> {
    async fn drive(&mut self, url: &str) -> Result<RunResult> {
        let mut events = self
            .session
            .take_events()
            .ok_or_else(|| Error::Internal("page event stream already taken".to_string()))?;

        self.prepare(url).await?;

        *self.state = RunnerState::Navigating;
        let navigated_at = Instant::now();
        self.session.navigate(url).await?;
        *self.state = RunnerState::AwaitingLiveness;

        let config = self.config;
        let timeouts = &config.timeouts;
        let mut watchdog = Watchdog::new(timeouts);
        let mut relay = Relay::new(config.ignore);
        let mut aggregator = ResultAggregator::new();
        // bounds a page whose load event never fires
        let load_deadline = navigated_at + timeouts.run();

        let mut poll = tokio::time::interval(timeouts.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = watchdog.deadline().unwrap_or(load_deadline);

            tokio::select! {
                biased;

                event = events.recv() => {
                    let Some(event) = event else {
                        return Err(Error::TransportClosed("the DevTools connection closed".to_string()));
                    };
                    if let Some(result) = self.handle_event(event, &mut watchdog, &mut relay, &mut aggregator)? {
                        return Ok(result);
                    }
                }

                _ = tokio::time::sleep_until(deadline) => {
                    if !watchdog.is_armed() {
                        return Err(Error::PageLoadTimeout(timeouts.run_ms));
                    }
                    watchdog.check(Instant::now())?;
                }

                _ = poll.tick(), if watchdog.needs_probe() => {
                    // a page busy in a long script cannot answer before the deadline
                    let evaluated = tokio::time::timeout_at(
                        deadline,
                        self.session.evaluate::<Probe>(PROBE_EXPRESSION),
                    )
                    .await;
                    let probe = match evaluated {
                        Ok(Ok(probe)) => probe,
                        // the page can be between documents
                        Ok(Err(Error::CdpCommandFailed { message, .. })) => {
                            tracing::debug!(%message, "Liveness probe failed");
                            Probe::default()
                        }
                        // no answer yet; queued events and the deadline decide
                        Ok(Err(Error::CdpTimeout { .. })) | Err(_) => {
                            tracing::debug!("Liveness probe got no answer");
                            continue;
                        }
                        Ok(Err(e)) => return Err(e),
                    };
                    if watchdog.observe(probe, Instant::now())? == LivenessState::Running {
                        *self.state = RunnerState::Executing;
                    }
                }
            }
        }
    }

    /// Enable the domains we listen to and install the client script
    async fn prepare(&mut self, url: &str) -> Result<()> {
        for domain in ["Runtime", "Page", "Network", "Inspector"] {
            self.session.call(&format!("{}.enable", domain), json!({})).await?;
        }
        self.session
            .call("Runtime.addBinding", json!({ "name": BINDING_NAME }))
            .await?;
        let source = script::page_script(&self.config.mocha)?;
        self.session
            .call("Page.addScriptToEvaluateOnNewDocument", json!({ "source": source }))
            .await?;

        if self.config.clear_local_storage {
            let origin = storage_origin(url);
            let cleared = self
                .session
                .call(
                    "Storage.clearDataForOrigin",
                    json!({ "origin": origin, "storageTypes": "local_storage" }),
                )
                .await;
            if let Err(e) = cleared {
                tracing::warn!(%origin, error = %e, "Could not clear localStorage");
            }
        }
        Ok(())
    }

    /// Handle one page event; `Some` once mocha has reported its results
    fn handle_event(
        &mut self,
        event: Event,
        watchdog: &mut Watchdog,
        relay: &mut Relay,
        aggregator: &mut ResultAggregator,
    ) -> Result<Option<RunResult>> {
        match event {
            Event::LoadEventFired => {
                tracing::debug!("Page loaded");
                watchdog.arm(Instant::now());
            }
            Event::BindingCalled(call) if call.name == BINDING_NAME => {
                match PageSignal::parse(&call.payload)? {
                    PageSignal::Started => {
                        watchdog.mark_started(Instant::now());
                        *self.state = RunnerState::Executing;
                    }
                    PageSignal::Stdout(text) => {
                        if !self.config.ignore.console {
                            self.write(&text);
                        }
                    }
                    PageSignal::Ended(stats) => {
                        if let Some(result) = aggregator.accept(&stats)? {
                            watchdog.complete();
                            return Ok(Some(result));
                        }
                    }
                }
            }
            Event::Detached { reason } => {
                return Err(Error::TransportClosed(format!("target detached ({})", reason)));
            }
            Event::TargetCrashed => {
                return Err(Error::TransportClosed("the page crashed".to_string()));
            }
            other => {
                if let Some(filtered) = relay.filter(&other) {
                    if filtered.is_fatal() {
                        return Err(filtered.to_error());
                    }
                    self.relay(filtered);
                }
            }
        }
        Ok(None)
    }

    fn relay(&self, event: FilteredEvent) {
        match &event {
            FilteredEvent::ConsoleMessage { text, .. } => {
                self.write(text);
                self.write("\n");
            }
            _ => {
                tracing::warn!("{}", event);
                let _ = self.events_tx.send(RunEvent::Log(event));
            }
        }
    }

    fn write(&self, text: &str) {
        if let Err(e) = self.output.write_str(text) {
            tracing::warn!(error = %e, "Failed to write page output");
        }
    }
}

/// Origin string `Storage.clearDataForOrigin` expects
fn storage_origin(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "file" => "file://".to_string(),
        Ok(parsed) => parsed.origin().ascii_serialization(),
        Err(_) => url.to_string(),
    }
}
