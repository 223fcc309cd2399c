//! CDP message types
//!
//! The subset of the Chrome DevTools Protocol this crate speaks.
//! See: https://chromedevtools.github.io/devtools-protocol/

use serde::{Deserialize, Serialize};
use serde_json::Value;

// === Base Protocol Messages ===

/// CDP command sent to the target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
    pub id: i64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// Error member of a failed command response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// CDP command response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// CDP event notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

// === Runtime domain ===

/// Mirror of a JavaScript value living in the page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unserializable_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<ObjectPreview>,
}

/// Shallow preview of an object's properties
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPreview {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub overflow: bool,
    #[serde(default)]
    pub properties: Vec<PropertyPreview>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyPreview {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
}

/// `Runtime.consoleAPICalled`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleApiCalled {
    /// log, info, warning, error, debug, ...
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub args: Vec<RemoteObject>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub line_number: i64,
    #[serde(default)]
    pub column_number: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<RemoteObject>,
}

impl ExceptionDetails {
    /// Best human-readable description (usually the stack)
    pub fn description(&self) -> String {
        self.exception
            .as_ref()
            .and_then(|e| e.description.clone().or_else(|| e.value.as_ref().map(|v| v.to_string())))
            .unwrap_or_else(|| self.text.clone())
    }
}

/// `Runtime.exceptionThrown`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionThrown {
    pub exception_details: ExceptionDetails,
}

/// `Runtime.bindingCalled`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingCalled {
    pub name: String,
    pub payload: String,
}

/// Result of `Runtime.evaluate`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
    pub result: RemoteObject,
    #[serde(default)]
    pub exception_details: Option<ExceptionDetails>,
}

// === Network domain ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub url: String,
}

/// `Network.requestWillBeSent`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
    pub request_id: String,
    pub request: Request,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
}

/// `Network.responseReceived`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
    pub request_id: String,
    pub response: Response,
}

/// `Network.loadingFinished`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinished {
    pub request_id: String,
}

/// `Network.loadingFailed`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailed {
    pub request_id: String,
    pub error_text: String,
    #[serde(default)]
    pub canceled: bool,
}

// === Page domain ===

/// Result of `Page.navigate`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateResult {
    #[serde(default)]
    pub frame_id: String,
    #[serde(default)]
    pub error_text: Option<String>,
}

// === DevTools HTTP endpoint ===

/// Entry of `/json/list`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub web_socket_debugger_url: Option<String>,
}

// === Events ===

/// Parsed CDP events the runner cares about
#[derive(Debug, Clone)]
pub enum Event {
    LoadEventFired,
    ConsoleApiCalled(ConsoleApiCalled),
    ExceptionThrown(ExceptionThrown),
    RequestWillBeSent(RequestWillBeSent),
    ResponseReceived(ResponseReceived),
    LoadingFinished(LoadingFinished),
    LoadingFailed(LoadingFailed),
    BindingCalled(BindingCalled),
    /// `Inspector.detached`
    Detached { reason: String },
    /// `Inspector.targetCrashed`
    TargetCrashed,
    Unknown { method: String },
}

impl Event {
    /// Parse an event from an event message
    pub fn from_message(msg: &EventMessage) -> Self {
        let params = msg.params.clone().unwrap_or(Value::Null);

        fn parse<T: serde::de::DeserializeOwned>(method: &str, params: Value) -> Option<T> {
            serde_json::from_value(params)
                .map_err(|e| tracing::warn!(method, error = %e, "Malformed CDP event"))
                .ok()
        }

        let parsed = match msg.method.as_str() {
            "Page.loadEventFired" => Some(Event::LoadEventFired),
            "Runtime.consoleAPICalled" => parse(&msg.method, params).map(Event::ConsoleApiCalled),
            "Runtime.exceptionThrown" => parse(&msg.method, params).map(Event::ExceptionThrown),
            "Runtime.bindingCalled" => parse(&msg.method, params).map(Event::BindingCalled),
            "Network.requestWillBeSent" => {
                parse(&msg.method, params).map(Event::RequestWillBeSent)
            }
            "Network.responseReceived" => parse(&msg.method, params).map(Event::ResponseReceived),
            "Network.loadingFinished" => parse(&msg.method, params).map(Event::LoadingFinished),
            "Network.loadingFailed" => parse(&msg.method, params).map(Event::LoadingFailed),
            "Inspector.detached" => Some(Event::Detached {
                reason: params
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
            }),
            "Inspector.targetCrashed" => Some(Event::TargetCrashed),
            _ => None,
        };

        parsed.unwrap_or_else(|| Event::Unknown {
            method: msg.method.clone(),
        })
    }
}
