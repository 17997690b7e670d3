//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! The kernel is a library, so installing a subscriber is the host's call:
//! - [`init_production`]: JSON file layer (daily rotation) plus stderr
//! - [`init_cli`]: stderr only, for tools and one-off runs
//!
//! Both respect `RUST_LOG` and fall back to [`DEFAULT_FILTER`]. Both use
//! `try_init`, so a host that already installed a subscriber gets an error
//! instead of a panic.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix of the rotated JSON logs.
pub const LOG_FILE_PREFIX: &str = "agent-immune.log";

/// Filter used when `RUST_LOG` is unset. sqlx statement logging is noisy.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Keeps the non-blocking file writer alive.
///
/// Dropping it flushes pending entries and closes the file.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install JSON file logging (`{logs_dir}/agent-immune.log.YYYY-MM-DD`) plus
/// human-readable stderr output.
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

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(false)
        .with_writer(non_blocking);
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(json_layer)
        .with(console_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(LoggingGuard { _guard: guard })
}

/// Install stderr-only logging.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_cli() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("a global tracing subscriber is already installed: {e}"))
}
