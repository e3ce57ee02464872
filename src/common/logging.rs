//! Logging and tracing configuration
//!
//! Console logging goes to stderr so stdout stays free for results.
//! An optional log file receives the full-detail stream.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize tracing for the CLI
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate (DEBUG with `verbose`), WARN for dependencies.
///
/// When `log_file` is given, a second layer appends to that file. The returned
/// guard must be kept alive until exit so buffered lines are flushed.
pub fn init_cli(verbose: bool, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let default_directive = if verbose {
        "runwright=debug,warn"
    } else {
        "runwright=info,warn"
    };
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .with_filter(filter());

    let (file_layer, guard) = match log_file.and_then(open_log_file) {
        Some(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

fn open_log_file(path: &Path) -> Option<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && std::fs::create_dir_all(parent).is_err() {
            eprintln!("Warning: Could not create log directory {}", parent.display());
            return None;
        }
    }

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("Warning: Could not open log file: {}", e);
            None
        }
    }
}
