//! In-page client script and the signals it sends back
//!
//! The script is registered with `Page.addScriptToEvaluateOnNewDocument`,
//! so it runs before any of the page's own scripts. It traps the `mocha`
//! global and reports through the `__mochaChromeSignal` binding:
//!
//! ```text
//! {"event": "started"}
//! {"event": "stdout", "data": "  ․․․\n"}
//! {"event": "ended", "data": {"passes": 2, "failures": 0, ...}}
//! ```

use serde::Deserialize;
use serde_json::Value;

use crate::common::config::MochaOptions;
use crate::common::{Error, Result};

/// Name of the `Runtime.addBinding` function the script calls
pub const BINDING_NAME: &str = "__mochaChromeSignal";

const CLIENT_SCRIPT: &str = include_str!("client.js");

/// A message from the client script
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum PageSignal {
    /// `mocha.run()` was called
    Started,
    /// Reporter output written through mocha's stdout shim
    Stdout(String),
    /// The runner emitted `end`; carries mocha's stats
    Ended(Value),
}

impl PageSignal {
    /// Decode a binding payload
    pub fn parse(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| Error::CdpProtocol(format!("unexpected page signal '{}': {}", payload, e)))
    }
}

/// Source registered on every new document
pub fn page_script(options: &MochaOptions) -> Result<String> {
    let options = serde_json::to_string(&options.to_page_options())?;
    Ok(format!(
        "window.__mochaChromeOptions = {};\n{}",
        options, CLIENT_SCRIPT
    ))
}
