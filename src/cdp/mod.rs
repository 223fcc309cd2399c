//! Chrome DevTools Protocol (CDP) client
//!
//! This module implements the client side of CDP for driving one page
//! target: commands go out over a websocket, responses are matched by id,
//! and events are forwarded on a channel.

pub mod client;
pub mod codec;
pub mod types;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::common::Result;

pub use client::CdpClient;
pub use types::*;

/// A connection to one debuggable page target
///
/// The runner only needs three things from a connection: send a domain
/// command, receive domain events in order, and close. `CdpClient` is the
/// real implementation; tests plug in a scripted page.
#[async_trait]
pub trait Transport: Send {
    /// Send a command and wait for its result
    async fn call(&mut self, method: &str, params: Value) -> Result<Value>;

    /// Take the event receiver (can only be called once)
    fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<Event>>;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&mut self) -> Result<()>;
}
