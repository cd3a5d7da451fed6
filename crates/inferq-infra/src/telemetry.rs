//! Structured logging initialization.
//!
//! `tracing-subscriber` with `EnvFilter`, defaulting to `info` when
//! `RUST_LOG` is unset. Additionally wires a rolling file appender scoped to
//! `ERROR`-level events — "log to error file" behavior — using
//! `tracing-appender`.

use std::path::Path;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Initializes a stdout subscriber only, for when no error-log directory is
/// configured.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Initializes a stdout subscriber plus a rolling daily file appender under
/// `error_log_dir` that captures only `ERROR`-level events (handler
/// failures). Returns the appender's `WorkerGuard`, which must be held for
/// the process lifetime to flush buffered writes.
pub fn init_tracing_with_error_log(error_log_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(filter);

    let file_appender = tracing_appender::rolling::daily(error_log_dir, "inferq-errors.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let error_file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(tracing_subscriber::filter::LevelFilter::ERROR);

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(error_file_layer)
        .init();

    guard
}
