//! Host output sink and the run-scoped output capture
//!
//! Reporter output is written to a `HostOutput`. While a run is active an
//! `OutputCapture` swaps the sink's writer for an in-memory buffer; when
//! the capture is released (or dropped on an early exit) the original
//! writer is put back and the buffered text, with checkmark glyphs fixed
//! up for the platform, is written through to it.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

/// Heavy check mark used by mocha's reporters
pub const CHECKMARK: &str = "\u{2713}";
/// Stand-in for the check mark on Windows consoles
pub const SQUARE_ROOT: &str = "\u{221A}";
/// UTF-8 bytes of the check mark mis-decoded as Windows-1252
pub const MOJIBAKE_CHECKMARK: &str = "\u{e2}\u{153}\u{201c}";

type BoxedWriter = Box<dyn Write + Send>;

/// Platform families with different glyph handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Other
        }
    }

    /// The glyph a passing test should be shown with
    pub fn checkmark(self) -> &'static str {
        match self {
            Self::Windows => SQUARE_ROOT,
            Self::Other => CHECKMARK,
        }
    }
}

/// Fix checkmark glyphs for the given platform
pub fn patch_glyphs(text: &str, platform: Platform) -> String {
    let text = text.replace(MOJIBAKE_CHECKMARK, platform.checkmark());
    match platform {
        Platform::Windows => text.replace(CHECKMARK, SQUARE_ROOT),
        Platform::Other => text,
    }
}

/// Cloneable in-memory writer
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap_or_else(PoisonError::into_inner)).into_owned()
    }

    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The host's textual output sink (stdout unless told otherwise)
#[derive(Clone)]
pub struct HostOutput {
    sink: Arc<Mutex<BoxedWriter>>,
}

impl HostOutput {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn write_str(&self, text: &str) -> io::Result<()> {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        sink.write_all(text.as_bytes())?;
        sink.flush()
    }

    fn replace(&self, writer: BoxedWriter) -> BoxedWriter {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *sink, writer)
    }
}

impl Default for HostOutput {
    fn default() -> Self {
        Self::stdout()
    }
}

impl std::fmt::Debug for HostOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostOutput").finish_non_exhaustive()
    }
}

/// Exclusive capture of a `HostOutput` for one run
pub struct OutputCapture {
    host: HostOutput,
    /// The displaced writer; `None` once restored
    original: Option<BoxedWriter>,
    buffer: SharedBuffer,
    platform: Platform,
}

impl std::fmt::Debug for OutputCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputCapture")
            .field("active", &self.original.is_some())
            .field("platform", &self.platform)
            .finish()
    }
}

impl OutputCapture {
    /// Start buffering everything written to `host`
    pub fn install(host: &HostOutput, platform: Platform) -> Self {
        let buffer = SharedBuffer::new();
        let original = host.replace(Box::new(buffer.clone()));
        tracing::trace!(?platform, "Output capture installed");
        Self {
            host: host.clone(),
            original: Some(original),
            buffer,
            platform,
        }
    }

    /// Restore the original writer and flush the corrected text through it
    ///
    /// Returns the text that was written.
    pub fn release(mut self) -> io::Result<String> {
        self.restore()
    }

    fn restore(&mut self) -> io::Result<String> {
        let Some(original) = self.original.take() else {
            return Ok(String::new());
        };
        self.host.replace(original);

        let raw = self.buffer.take();
        let text = patch_glyphs(&String::from_utf8_lossy(&raw), self.platform);
        self.host.write_str(&text)?;
        tracing::trace!(bytes = text.len(), "Output capture released");
        Ok(text)
    }
}

impl Drop for OutputCapture {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            tracing::warn!(error = %e, "Failed to flush captured output");
        }
    }
}
