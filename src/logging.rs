//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! - [`init_production`]: JSON file layer with daily rotation plus a console
//!   layer, for the long-running `start` command.
//! - [`init_cli`]: console only, for one-shot commands.
//!
//! Supervised child output arrives under the `switchboard::child` target.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix of the rotated JSON log.
pub const LOG_FILE_PREFIX: &str = "switchboard.log";

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Keeps the non-blocking file writer alive.
///
/// Dropping it flushes pending entries and closes the file, so hold it
/// until the process exits.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install file and console logging for the service.
///
/// JSON records go to `{logs_dir}/switchboard.log.YYYY-MM-DD`; a
/// human-readable copy goes to stderr. Both honour `RUST_LOG`.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created or a global
/// subscriber is already installed.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_writer(non_blocking),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("logging already initialised")?;

    Ok(LoggingGuard { _guard: guard })
}

/// Install console-only logging on stderr for one-shot commands.
///
/// A second call is a no-op.
pub fn init_cli() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
