//! Event filter and relay
//!
//! Turns raw page events into `FilteredEvent`s according to the ignore
//! flags. Console output is either dropped or relayed, never fatal.
//! Exceptions and failed resource loads are fatal unless ignored, in which
//! case they are relayed as log records.

use std::collections::HashMap;

use serde_json::Value;

use crate::cdp::{Event, RemoteObject};
use crate::common::config::IgnoreConfig;
use crate::common::Error;

/// A page event that survived filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilteredEvent {
    ConsoleMessage { level: String, text: String },
    UncaughtException { description: String, fatal: bool },
    ResourceLoadFailure { url: String, reason: String, fatal: bool },
}

impl FilteredEvent {
    /// Whether this event ends the run
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ConsoleMessage { .. } => false,
            Self::UncaughtException { fatal, .. } | Self::ResourceLoadFailure { fatal, .. } => *fatal,
        }
    }

    /// The run failure this event stands for
    pub fn to_error(&self) -> Error {
        match self {
            Self::ConsoleMessage { text, .. } => Error::Internal(format!("console: {}", text)),
            Self::UncaughtException { description, .. } => Error::PageException(description.clone()),
            Self::ResourceLoadFailure { url, reason, .. } => Error::ResourceLoadFailed {
                url: url.clone(),
                reason: reason.clone(),
            },
        }
    }
}

impl std::fmt::Display for FilteredEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConsoleMessage { text, .. } => write!(f, "{}", text),
            other => write!(f, "{}", other.to_error()),
        }
    }
}

/// Stateful filter for one run
#[derive(Debug)]
pub struct Relay {
    ignore: IgnoreConfig,
    /// requestId -> URL, for naming failed loads
    requests: HashMap<String, String>,
}

impl Relay {
    pub fn new(ignore: IgnoreConfig) -> Self {
        Self {
            ignore,
            requests: HashMap::new(),
        }
    }

    /// Filter one page event; `None` means nothing to relay
    pub fn filter(&mut self, event: &Event) -> Option<FilteredEvent> {
        match event {
            Event::ConsoleApiCalled(call) => {
                if self.ignore.console || matches!(call.kind.as_str(), "clear" | "endGroup") {
                    return None;
                }
                Some(FilteredEvent::ConsoleMessage {
                    level: call.kind.clone(),
                    text: format_console_args(&call.args),
                })
            }
            Event::ExceptionThrown(thrown) => Some(FilteredEvent::UncaughtException {
                description: thrown.exception_details.description(),
                fatal: !self.ignore.exceptions,
            }),
            Event::RequestWillBeSent(sent) => {
                self.requests
                    .insert(sent.request_id.clone(), sent.request.url.clone());
                None
            }
            Event::ResponseReceived(received) if received.response.status >= 400 => {
                let response = &received.response;
                let reason = format!("{} {}", response.status, response.status_text);
                Some(FilteredEvent::ResourceLoadFailure {
                    url: response.url.clone(),
                    reason: reason.trim().to_string(),
                    fatal: !self.ignore.resource_errors,
                })
            }
            Event::LoadingFinished(finished) => {
                self.requests.remove(&finished.request_id);
                None
            }
            Event::LoadingFailed(failed) => {
                let url = self
                    .requests
                    .remove(&failed.request_id)
                    .unwrap_or_else(|| format!("request {}", failed.request_id));
                if failed.canceled {
                    tracing::trace!(url = %url, "Request canceled");
                    return None;
                }
                Some(FilteredEvent::ResourceLoadFailure {
                    url,
                    reason: failed.error_text.clone(),
                    fatal: !self.ignore.resource_errors,
                })
            }
            _ => None,
        }
    }
}

/// Render console arguments the way a terminal console would
///
/// The first argument, if a string, is a format string supporting
/// `%s %d %i %f %o %O %j %c %%`. Unused arguments are appended with spaces.
pub fn format_console_args(args: &[RemoteObject]) -> String {
    let Some(first) = args.first() else {
        return String::new();
    };

    let mut rest = args[1..].iter();
    let mut out = match (first.kind.as_str(), first.value.as_ref()) {
        ("string", Some(Value::String(format))) => apply_format(format, &mut rest),
        _ => render(first),
    };

    for arg in rest {
        out.push(' ');
        out.push_str(&render(arg));
    }
    out
}

fn apply_format<'a>(format: &str, args: &mut impl Iterator<Item = &'a RemoteObject>) -> String {
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let Some(&directive) = chars.peek() else {
            out.push('%');
            break;
        };
        match directive {
            '%' => {
                chars.next();
                out.push('%');
            }
            's' | 'd' | 'i' | 'f' | 'o' | 'O' | 'j' | 'c' => {
                chars.next();
                let Some(arg) = args.next() else {
                    out.push('%');
                    out.push(directive);
                    continue;
                };
                match directive {
                    's' | 'o' | 'O' | 'j' => out.push_str(&render(arg)),
                    'd' | 'i' => out.push_str(&number(arg, true)),
                    'f' => out.push_str(&number(arg, false)),
                    // CSS styling has no terminal equivalent
                    _ => {}
                }
            }
            _ => out.push('%'),
        }
    }
    out
}

fn number(arg: &RemoteObject, integer: bool) -> String {
    if let Some(special) = &arg.unserializable_value {
        return special.clone();
    }
    let parsed = match &arg.value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    match parsed {
        Some(n) if integer => format!("{}", n.trunc() as i64),
        Some(n) => format!("{}", n),
        None => "NaN".to_string(),
    }
}

/// Render one remote object without touching the page
///
/// Objects are rendered from their preview, which is shallow, so
/// circular structures are safe.
pub fn render(arg: &RemoteObject) -> String {
    match arg.kind.as_str() {
        "undefined" => "undefined".to_string(),
        "string" => match &arg.value {
            Some(Value::String(s)) => s.clone(),
            _ => arg.description.clone().unwrap_or_default(),
        },
        "number" | "boolean" | "bigint" => arg
            .unserializable_value
            .clone()
            .or_else(|| arg.value.as_ref().map(|v| v.to_string()))
            .or_else(|| arg.description.clone())
            .unwrap_or_default(),
        "object" if arg.subtype.as_deref() == Some("null") => "null".to_string(),
        "object" => render_object(arg),
        _ => arg
            .description
            .clone()
            .unwrap_or_else(|| arg.kind.clone()),
    }
}

fn render_object(arg: &RemoteObject) -> String {
    if arg.subtype.as_deref() == Some("error") {
        return arg.description.clone().unwrap_or_else(|| "Error".to_string());
    }

    let Some(preview) = &arg.preview else {
        return arg
            .description
            .clone()
            .or_else(|| arg.class_name.clone())
            .unwrap_or_else(|| "Object".to_string());
    };

    let is_array = preview.subtype.as_deref() == Some("array");
    let mut parts: Vec<String> = preview
        .properties
        .iter()
        .map(|p| {
            let value = match (p.kind.as_str(), &p.value) {
                ("string", Some(v)) => format!("'{}'", v),
                (_, Some(v)) => v.clone(),
                (kind, None) => kind.to_string(),
            };
            if is_array {
                value
            } else {
                format!("{}: {}", p.name, value)
            }
        })
        .collect();
    if preview.overflow {
        parts.push("...".to_string());
    }

    match (is_array, parts.is_empty()) {
        (true, true) => "[]".to_string(),
        (true, false) => format!("[ {} ]", parts.join(", ")),
        (false, true) => "{}".to_string(),
        (false, false) => {
            let prefix = match arg.class_name.as_deref() {
                Some("Object") | None => String::new(),
                Some(class) => format!("{} ", class),
            };
            format!("{}{{ {} }}", prefix, parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::EventMessage;
    use serde_json::json;

    fn obj(value: Value) -> RemoteObject {
        serde_json::from_value(value).unwrap()
    }

    fn string(s: &str) -> RemoteObject {
        obj(json!({"type": "string", "value": s}))
    }

    fn event(method: &str, params: Value) -> Event {
        Event::from_message(&EventMessage {
            method: method.to_string(),
            params: Some(params),
        })
    }

    #[test]
    fn test_format_string_substitution() {
        let args = [
            string("  %s passing (%dms)"),
            obj(json!({"type": "number", "value": 3})),
            obj(json!({"type": "number", "value": 12.7})),
        ];
        assert_eq!(format_console_args(&args), "  3 passing (12ms)");
    }

    #[test]
    fn test_format_extra_args_and_percent() {
        let args = [string("100%% done"), string("extra"), obj(json!({"type": "boolean", "value": true}))];
        assert_eq!(format_console_args(&args), "100% done extra true");
    }

    #[test]
    fn test_format_missing_args_kept_literal() {
        assert_eq!(format_console_args(&[string("%s and %d")]), "%s and %d");
    }

    #[test]
    fn test_format_css_is_dropped() {
        let args = [string("%cred%c plain"), string("color: red"), string("")];
        assert_eq!(format_console_args(&args), "red plain");
    }

    #[test]
    fn test_render_special_values() {
        assert_eq!(render(&obj(json!({"type": "undefined"}))), "undefined");
        assert_eq!(render(&obj(json!({"type": "object", "subtype": "null", "value": null}))), "null");
        assert_eq!(render(&obj(json!({"type": "number", "unserializableValue": "NaN"}))), "NaN");
        assert_eq!(
            render(&obj(json!({"type": "function", "description": "function foo() {}"}))),
            "function foo() {}"
        );
    }

    #[test]
    fn test_render_circular_object() {
        // `var a = {name: 'a'}; a.self = a; console.log(a)`
        let circular = obj(json!({
            "type": "object",
            "className": "Object",
            "description": "Object",
            "preview": {
                "type": "object",
                "description": "Object",
                "overflow": false,
                "properties": [
                    {"name": "name", "type": "string", "value": "a"},
                    {"name": "self", "type": "object", "value": "Object"}
                ]
            }
        }));
        assert_eq!(format_console_args(&[circular]), "{ name: 'a', self: Object }");
    }

    #[test]
    fn test_render_array_preview() {
        let array = obj(json!({
            "type": "object",
            "subtype": "array",
            "className": "Array",
            "description": "Array(3)",
            "preview": {
                "type": "object",
                "subtype": "array",
                "overflow": true,
                "properties": [
                    {"name": "0", "type": "number", "value": "1"},
                    {"name": "1", "type": "number", "value": "2"}
                ]
            }
        }));
        assert_eq!(render(&array), "[ 1, 2, ... ]");
    }

    #[test]
    fn test_console_suppressed_when_ignored() {
        let log = event(
            "Runtime.consoleAPICalled",
            json!({"type": "log", "args": [{"type": "string", "value": "hi"}]}),
        );

        let mut relay = Relay::new(IgnoreConfig { console: true, ..Default::default() });
        assert_eq!(relay.filter(&log), None);

        let mut relay = Relay::new(IgnoreConfig::default());
        let relayed = relay.filter(&log).unwrap();
        assert!(!relayed.is_fatal());
        assert_eq!(relayed.to_string(), "hi");
    }

    #[test]
    fn test_exception_fatal_unless_ignored() {
        let thrown = event(
            "Runtime.exceptionThrown",
            json!({"exceptionDetails": {"text": "Uncaught", "exception":
                {"type": "object", "subtype": "error", "description": "TypeError: x is undefined"}}}),
        );

        let mut relay = Relay::new(IgnoreConfig::default());
        let filtered = relay.filter(&thrown).unwrap();
        assert!(filtered.is_fatal());
        assert_eq!(
            filtered.to_error().to_string(),
            "Uncaught exception in page: TypeError: x is undefined"
        );

        let mut relay = Relay::new(IgnoreConfig { exceptions: true, ..Default::default() });
        assert!(!relay.filter(&thrown).unwrap().is_fatal());
    }

    #[test]
    fn test_loading_failed_names_url() {
        let mut relay = Relay::new(IgnoreConfig::default());
        assert_eq!(
            relay.filter(&event(
                "Network.requestWillBeSent",
                json!({"requestId": "7", "request": {"url": "file:///tmp/missing.js"}}),
            )),
            None
        );

        let failed = relay
            .filter(&event(
                "Network.loadingFailed",
                json!({"requestId": "7", "errorText": "net::ERR_FILE_NOT_FOUND", "canceled": false}),
            ))
            .unwrap();
        assert!(failed.is_fatal());
        assert_eq!(
            failed.to_error().to_string(),
            "Failed to load resource file:///tmp/missing.js: net::ERR_FILE_NOT_FOUND"
        );
    }

    #[test]
    fn test_finished_requests_are_forgotten() {
        let mut relay = Relay::new(IgnoreConfig::default());
        for id in ["1", "2"] {
            relay.filter(&event(
                "Network.requestWillBeSent",
                json!({"requestId": id, "request": {"url": format!("http://localhost/{}.js", id)}}),
            ));
        }
        assert_eq!(relay.requests.len(), 2);

        let finished = event("Network.loadingFinished", json!({"requestId": "1", "encodedDataLength": 120}));
        assert_eq!(relay.filter(&finished), None);
        assert_eq!(relay.requests.len(), 1);
        assert!(relay.requests.contains_key("2"));
    }

    #[test]
    fn test_canceled_load_is_not_a_failure() {
        let mut relay = Relay::new(IgnoreConfig::default());
        let canceled = event(
            "Network.loadingFailed",
            json!({"requestId": "1", "errorText": "net::ERR_ABORTED", "canceled": true}),
        );
        assert_eq!(relay.filter(&canceled), None);
    }

    #[test]
    fn test_http_error_status() {
        let mut relay = Relay::new(IgnoreConfig { resource_errors: true, ..Default::default() });
        let not_found = event(
            "Network.responseReceived",
            json!({"requestId": "2", "response":
                {"url": "http://localhost/lib.js", "status": 404, "statusText": "Not Found"}}),
        );
        let filtered = relay.filter(&not_found).unwrap();
        assert!(!filtered.is_fatal());
        assert_eq!(
            filtered,
            FilteredEvent::ResourceLoadFailure {
                url: "http://localhost/lib.js".to_string(),
                reason: "404 Not Found".to_string(),
                fatal: false,
            }
        );

        let ok = event(
            "Network.responseReceived",
            json!({"requestId": "3", "response": {"url": "http://localhost/ok.js", "status": 200}}),
        );
        assert_eq!(relay.filter(&ok), None);
    }
}
