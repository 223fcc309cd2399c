//! CDP client over a websocket
//!
//! A background reader task owns the receiving half of the socket. It
//! resolves pending commands by id and forwards events, in arrival order,
//! to an unbounded channel that the session drains.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::common::{Error, Result};

use super::codec::{self, Incoming};
use super::types::{Event, ResponseMessage};
use super::Transport;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<Mutex<HashMap<i64, oneshot::Sender<ResponseMessage>>>>;

/// CDP client for one page target
pub struct CdpClient {
    /// Sending half of the websocket
    writer: SplitSink<WsStream, Message>,
    /// Id for the next command
    seq: i64,
    /// Commands waiting for responses
    pending: Pending,
    /// Receiver for events (given to the session)
    event_rx: Option<mpsc::UnboundedReceiver<Event>>,
    /// Background reader
    reader: JoinHandle<()>,
    /// Per-command timeout
    request_timeout: Duration,
    closed: bool,
}

impl CdpClient {
    /// Connect to a target's `webSocketDebuggerUrl`
    pub async fn connect(ws_url: &str, request_timeout: Duration) -> Result<Self> {
        tracing::debug!(url = %ws_url, "Connecting to DevTools target");

        let (stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| Error::ConnectionFailed {
                url: ws_url.to_string(),
                reason: e.to_string(),
            })?;

        let (writer, reader) = stream.split();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(reader, pending.clone(), event_tx));

        Ok(Self {
            writer,
            seq: 1,
            pending,
            event_rx: Some(event_rx),
            reader,
            request_timeout,
            closed: false,
        })
    }

    /// Get the next command id
    fn next_seq(&mut self) -> i64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    fn forget(&self, id: i64) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

/// Route incoming frames until the socket closes
///
/// Dropping `pending` and `event_tx` on exit is what tells waiters the
/// connection is gone.
async fn read_loop(
    mut reader: SplitStream<WsStream>,
    pending: Pending,
    event_tx: mpsc::UnboundedSender<Event>,
) {
    while let Some(frame) = reader.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                tracing::debug!(?frame, "DevTools socket closed by browser");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "DevTools socket error");
                break;
            }
        };

        tracing::trace!("CDP <<< {}", text);

        match codec::decode(&text) {
            Ok(Incoming::Response(response)) => {
                let waiter = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&response.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => tracing::warn!(id = response.id, "Response for unknown command"),
                }
            }
            Ok(Incoming::Event(message)) => {
                if event_tx.send(Event::from_message(&message)).is_err() {
                    // Session went away; keep answering commands until close
                    tracing::trace!(method = %message.method, "Dropping event, no receiver");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring undecodable CDP frame"),
        }
    }

    pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
}

#[async_trait]
impl Transport for CdpClient {
    async fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        if self.closed {
            return Err(Error::TransportClosed("connection already closed".to_string()));
        }

        let id = self.next_seq();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);

        let text = codec::encode_request(id, method, params)?;
        tracing::trace!("CDP >>> {}", text);

        if let Err(e) = self.writer.send(Message::Text(text)).await {
            self.forget(id);
            return Err(Error::TransportClosed(e.to_string()));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => match response.error {
                Some(err) => Err(Error::cdp_command_failed(method, &err.message)),
                None => Ok(response.result.unwrap_or(Value::Null)),
            },
            Ok(Err(_)) => Err(Error::TransportClosed(format!(
                "socket closed while waiting for {}",
                method
            ))),
            Err(_) => {
                self.forget(id);
                Err(Error::CdpTimeout {
                    method: method.to_string(),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                })
            }
        }
    }

    fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<Event>> {
        self.event_rx.take()
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // The browser may already be gone
        let _ = self.writer.close().await;
        self.reader.abort();
        Ok(())
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
