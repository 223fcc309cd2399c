//! Configuration paths and page location helpers

use std::path::{Path, PathBuf};

use super::{Error, Result};

/// Directory name used for configuration
const APP_NAME: &str = "mocha-chrome";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/mocha-chrome/`
/// - macOS: `~/Library/Application Support/mocha-chrome/`
/// - Windows: `%APPDATA%\mocha-chrome\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Turn a CLI page argument into a URL
///
/// Anything with a scheme is taken as-is; everything else is treated as a
/// file path and resolved against the current directory.
pub fn page_url(input: &str) -> Result<String> {
    if reqwest::Url::parse(input).map(|u| u.scheme().len() > 1).unwrap_or(false) {
        return Ok(input.to_string());
    }

    let path = Path::new(input);
    let absolute = path.canonicalize().map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;

    reqwest::Url::from_file_path(&absolute)
        .map(|u| u.to_string())
        .map_err(|_| Error::Config(format!("cannot build a file URL for '{}'", absolute.display())))
}
