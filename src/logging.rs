//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! Human-readable output always goes to stderr (filtered by `RUST_LOG`,
//! default `info`). When the log directory is writable a JSON file layer
//! with daily rotation is added so unattended hook-triggered runs leave a
//! trail under `/var/log/moktrust`.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Holds the non-blocking writer guard for file logging.
///
/// The [`WorkerGuard`] must be kept alive for the duration of the process.
/// Dropping it flushes pending log entries and closes the file.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Initialise logging with a JSON file layer plus stderr output.
///
/// Writes JSON logs to `{log_dir}/moktrust.log.YYYY-MM-DD` with daily
/// rotation. Returns a [`LoggingGuard`] that must be kept alive for log
/// flushing.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created; callers fall
/// back to [`init_stderr`].
pub fn init_with_file(log_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(log_dir).map_err(|e| {
        anyhow::anyhow!("failed to create log directory {}: {e}", log_dir.display())
    })?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "moktrust.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking);

    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(console_layer)
        .init();

    Ok(LoggingGuard { _guard: guard })
}

/// Initialise stderr-only logging. Used when the log directory is not
/// available (e.g. read-only filesystem during diagnosis).
pub fn init_stderr() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
