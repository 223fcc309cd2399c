//! Logging and tracing configuration
//!
//! Logs always go to stderr so that reporter output on stdout stays
//! machine-readable. An optional log file gets full detail.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default filter when `RUST_LOG` is not set
fn default_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("mocha_chrome=debug,warn")
    } else {
        EnvFilter::new("mocha_chrome=warn,warn")
    }
}

/// Initialize tracing for the CLI
///
/// Logs are controlled by the `RUST_LOG` environment variable. When a log
/// file is given, CDP traffic is written there at trace level. The returned
/// guard must be held until exit so buffered file lines are flushed.
pub fn init_cli(verbose: bool, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(filter);

    let Some(path) = log_file else {
        tracing_subscriber::registry().with(stderr_layer).init();
        return None;
    };

    let file = match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Warning: Could not open log file {}: {}", path.display(), e);
            tracing_subscriber::registry().with(stderr_layer).init();
            return None;
        }
    };

    let (writer, guard) = tracing_appender::non_blocking(file);
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(EnvFilter::new("mocha_chrome=trace,info"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Some(guard)
}
