//! CDP wire codec
//!
//! Each websocket text frame carries one JSON message. Commands carry an
//! `id`; the browser answers with the same `id` and either `result` or
//! `error`. Anything with a `method` and no `id` is an event:
//! ```text
//! -> {"id":1,"method":"Page.navigate","params":{"url":"..."}}
//! <- {"id":1,"result":{"frameId":"..."}}
//! <- {"method":"Page.loadEventFired","params":{"timestamp":1.5}}
//! ```

use serde_json::Value;

use crate::common::Error;

use super::types::{EventMessage, RequestMessage, ResponseMessage};

/// A decoded message from the browser
#[derive(Debug, Clone)]
pub enum Incoming {
    Response(ResponseMessage),
    Event(EventMessage),
}

/// Encode a command as a text frame
pub fn encode_request(id: i64, method: &str, params: Value) -> Result<String, Error> {
    let request = RequestMessage {
        id,
        method: method.to_string(),
        params,
    };
    Ok(serde_json::to_string(&request)?)
}

/// Decode a text frame from the browser
pub fn decode(text: &str) -> Result<Incoming, Error> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| Error::CdpProtocol(format!("Invalid JSON: {}", e)))?;

    if value.get("id").is_some() {
        let response: ResponseMessage = serde_json::from_value(value)
            .map_err(|e| Error::CdpProtocol(format!("Invalid response: {}", e)))?;
        return Ok(Incoming::Response(response));
    }

    if value.get("method").is_some() {
        let event: EventMessage = serde_json::from_value(value)
            .map_err(|e| Error::CdpProtocol(format!("Invalid event: {}", e)))?;
        return Ok(Incoming::Event(event));
    }

    Err(Error::CdpProtocol(format!("Unrecognized message: {}", text)))
}
