//! Session handle
//!
//! Owns the one live connection of a run, its event stream and, when we
//! started it ourselves, the browser process.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::browser::{self, BrowserProcess};
use crate::cdp::{CdpClient, EvaluateResult, Event, NavigateResult, Transport};
use crate::common::config::RunConfig;
use crate::common::{Error, Result};

/// Connection to the page under test
pub struct Session {
    transport: Box<dyn Transport>,
    events: Option<mpsc::UnboundedReceiver<Event>>,
    /// Chrome we launched; `None` when attached to a remote browser
    browser: Option<BrowserProcess>,
    closed: bool,
}

impl Session {
    /// Open a session as configured: attach to `browser.remote`, or launch Chrome
    #[tracing::instrument(skip(config), fields(remote = ?config.browser.remote))]
    pub async fn open(config: &RunConfig) -> Result<Self> {
        let request_timeout = config.timeouts.cdp_request();

        if let Some(remote) = &config.browser.remote {
            let ws_url = browser::page_target(remote).await?;
            let client = CdpClient::connect(&ws_url, request_timeout).await?;
            return Ok(Self::with_transport(Box::new(client)));
        }

        let mut process = browser::launch(&config.browser, config.timeouts.browser_launch()).await?;
        let connected = async {
            let ws_url = browser::page_target(&process.http_endpoint).await?;
            CdpClient::connect(&ws_url, request_timeout).await
        }
        .await;

        match connected {
            Ok(client) => {
                let mut session = Self::with_transport(Box::new(client));
                session.browser = Some(process);
                Ok(session)
            }
            Err(e) => {
                process.close().await;
                Err(e)
            }
        }
    }

    /// Wrap an already connected transport
    pub fn with_transport(mut transport: Box<dyn Transport>) -> Self {
        let events = transport.take_event_receiver();
        Self {
            transport,
            events,
            browser: None,
            closed: false,
        }
    }

    /// Take the page's event stream (once)
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<Event>> {
        self.events.take()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send a raw domain command
    pub async fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        if self.closed {
            return Err(Error::TransportClosed("session already closed".to_string()));
        }
        self.transport.call(method, params).await
    }

    /// Evaluate an expression in the page and deserialize its value
    pub async fn evaluate<T: DeserializeOwned>(&mut self, expression: &str) -> Result<T> {
        let raw = self
            .call(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true }),
            )
            .await?;
        let evaluated: EvaluateResult = serde_json::from_value(raw)?;

        if let Some(details) = evaluated.exception_details {
            return Err(Error::cdp_command_failed("Runtime.evaluate", &details.description()));
        }
        Ok(serde_json::from_value(evaluated.result.value.unwrap_or(Value::Null))?)
    }

    /// Navigate the page; fails if the browser reports a navigation error
    pub async fn navigate(&mut self, url: &str) -> Result<()> {
        tracing::info!(url = %url, "Navigating");
        let raw = self.call("Page.navigate", json!({ "url": url })).await?;
        let navigated: NavigateResult = serde_json::from_value(raw)?;

        match navigated.error_text {
            Some(reason) if !reason.is_empty() => Err(Error::NavigationFailed {
                url: url.to_string(),
                reason,
            }),
            _ => Ok(()),
        }
    }

    /// Close the connection and the browser we started. Closing twice is a no-op.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.transport.close().await {
            tracing::debug!(error = %e, "Error closing DevTools connection");
        }
        if let Some(mut process) = self.browser.take() {
            process.close().await;
        }
        tracing::debug!("Session closed");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("launched_browser", &self.browser.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}
