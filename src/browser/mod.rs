//! Chrome discovery, launch and target lookup
//!
//! Chrome is started headless with `--remote-debugging-port=0`; it picks a
//! free port and announces it on stderr:
//! ```text
//! DevTools listening on ws://127.0.0.1:38211/devtools/browser/6c1d...
//! ```
//! The page target is then looked up on the HTTP endpoint (`/json/list`).

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use crate::cdp::TargetInfo;
use crate::common::config::BrowserConfig;
use crate::common::{Error, Result};

/// Executable names tried on PATH, in order
const CHROME_NAMES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

#[cfg(target_os = "macos")]
const CHROME_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

#[cfg(windows)]
const CHROME_PATHS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
];

#[cfg(not(any(target_os = "macos", windows)))]
const CHROME_PATHS: &[&str] = &["/usr/bin/google-chrome", "/usr/bin/chromium", "/snap/bin/chromium"];

/// Flags every launch gets
const DEFAULT_FLAGS: &[&str] = &[
    "--remote-debugging-port=0",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-extensions",
    "--disable-background-networking",
    "--disable-sync",
    "--disable-translate",
    "--mute-audio",
    "--allow-file-access-from-files",
];

/// A Chrome process started for one run
pub struct BrowserProcess {
    child: Child,
    /// Temporary profile, removed when the process handle is dropped
    _profile: TempDir,
    /// DevTools HTTP endpoint, e.g. `http://127.0.0.1:38211`
    pub http_endpoint: String,
}

impl BrowserProcess {
    /// Kill the browser and wait for it to exit
    pub async fn close(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "Chrome already exited");
        }
    }
}

impl Drop for BrowserProcess {
    fn drop(&mut self) {
        // Best-effort since we can't await in drop
        let _ = self.child.start_kill();
    }
}

/// Locate a Chrome executable
///
/// Order: explicit config path, `CHROME_PATH`, PATH lookup, well-known
/// install locations.
pub fn find_chrome(config: &BrowserConfig) -> Result<PathBuf> {
    if let Some(path) = &config.chrome_path {
        if path.exists() {
            return Ok(path.clone());
        }
        return Err(Error::browser_not_found(&[path.display().to_string()]));
    }

    if let Ok(path) = std::env::var("CHROME_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
    }

    for name in CHROME_NAMES {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }

    for candidate in CHROME_PATHS {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Ok(path);
        }
    }

    let mut searched: Vec<&str> = vec!["CHROME_PATH"];
    searched.extend_from_slice(CHROME_NAMES);
    searched.extend_from_slice(CHROME_PATHS);
    Err(Error::browser_not_found(&searched))
}

/// Parse the DevTools websocket address Chrome prints on startup
pub fn parse_devtools_address(line: &str) -> Option<String> {
    let start = line.find("DevTools listening on ")?;
    let addr = line[start + "DevTools listening on ".len()..].trim();
    if addr.starts_with("ws://") || addr.starts_with("wss://") {
        Some(addr.to_string())
    } else {
        None
    }
}

/// Derive the HTTP endpoint from a browser websocket address
pub fn http_endpoint(ws_url: &str) -> Option<String> {
    let rest = ws_url
        .strip_prefix("ws://")
        .map(|r| ("http", r))
        .or_else(|| ws_url.strip_prefix("wss://").map(|r| ("https", r)))?;
    let host = rest.1.split('/').next().filter(|h| !h.is_empty())?;
    Some(format!("{}://{}", rest.0, host))
}

/// Launch Chrome and wait for its DevTools endpoint
#[tracing::instrument(skip(config))]
pub async fn launch(config: &BrowserConfig, timeout: Duration) -> Result<BrowserProcess> {
    let chrome = find_chrome(config)?;
    let profile = tempfile::Builder::new()
        .prefix("mocha-chrome-")
        .tempdir()
        .map_err(|e| Error::BrowserLaunchFailed(format!("cannot create profile dir: {}", e)))?;

    let mut cmd = Command::new(&chrome);
    if config.headless {
        cmd.args(["--headless", "--disable-gpu"]);
    }
    cmd.args(DEFAULT_FLAGS)
        .arg(format!("--user-data-dir={}", profile.path().display()))
        .args(&config.chrome_flags)
        .arg("about:blank")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::info!(chrome = %chrome.display(), flags = ?config.chrome_flags, "Launching Chrome");

    let mut child = cmd.spawn().map_err(|e| {
        Error::BrowserLaunchFailed(format!("failed to start {}: {}", chrome.display(), e))
    })?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::BrowserLaunchFailed("failed to get Chrome stderr".to_string()))?;

    let ws_url = match tokio::time::timeout(timeout, wait_for_endpoint(stderr)).await {
        Ok(Ok(url)) => url,
        Ok(Err(e)) => {
            let _ = child.start_kill();
            return Err(e);
        }
        Err(_) => {
            let _ = child.start_kill();
            return Err(Error::BrowserLaunchTimeout(timeout.as_millis() as u64));
        }
    };

    let http_endpoint = http_endpoint(&ws_url)
        .ok_or_else(|| Error::BrowserLaunchFailed(format!("unexpected endpoint '{}'", ws_url)))?;

    tracing::debug!(endpoint = %http_endpoint, "Chrome is listening");

    Ok(BrowserProcess {
        child,
        _profile: profile,
        http_endpoint,
    })
}

/// Read stderr until the DevTools line appears, then keep draining it
async fn wait_for_endpoint(stderr: ChildStderr) -> Result<String> {
    let mut lines = BufReader::new(stderr).lines();

    while let Some(line) = lines.next_line().await? {
        tracing::trace!("chrome: {}", line);
        if let Some(url) = parse_devtools_address(&line) {
            // Chrome blocks if nobody reads its stderr
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::trace!("chrome: {}", line);
                }
            });
            return Ok(url);
        }
    }

    Err(Error::BrowserLaunchFailed(
        "Chrome exited before opening a DevTools endpoint".to_string(),
    ))
}

/// Find the websocket URL of a page target on a DevTools HTTP endpoint
///
/// Opens a blank page when the browser has none.
pub async fn page_target(http_endpoint: &str) -> Result<String> {
    let base = http_endpoint.trim_end_matches('/');
    let client = reqwest::Client::new();

    let targets: Vec<TargetInfo> = client
        .get(format!("{}/json/list", base))
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| Error::ConnectionFailed {
            url: base.to_string(),
            reason: e.to_string(),
        })?
        .json()
        .await
        .map_err(|e| Error::CdpProtocol(format!("invalid /json/list response: {}", e)))?;

    if let Some(url) = select_page(&targets) {
        return Ok(url);
    }

    tracing::debug!("No page target, opening one");
    let created: TargetInfo = client
        .put(format!("{}/json/new?about:blank", base))
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|_| Error::TargetNotFound(base.to_string()))?
        .json()
        .await
        .map_err(|e| Error::CdpProtocol(format!("invalid /json/new response: {}", e)))?;

    created
        .web_socket_debugger_url
        .ok_or_else(|| Error::TargetNotFound(base.to_string()))
}

/// First page target that can be attached to
pub fn select_page(targets: &[TargetInfo]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t.kind == "page")
        .find_map(|t| t.web_socket_debugger_url.clone())
}
