//! `tracing` subscriber setup for the binary.
//!
//! Two sinks:
//! - stderr, compact text or JSON (`--log-json`), `warn` by default so it
//!   stays out of the progress UI
//! - `<log_dir>/phasegate.log`, always JSON, `info` by default
//!
//! `--verbose` raises both to `debug`. `RUST_LOG` overrides either default.

use anyhow::{Context, Result};
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOG_FILE: &str = "phasegate.log";

fn filter(default: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy()
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process, or buffered
/// file output is lost.
pub fn init(verbose: bool, json: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let (stderr_level, file_level) = if verbose {
        (Level::DEBUG, Level::DEBUG)
    } else {
        (Level::WARN, Level::INFO)
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(rolling::never(dir, LOG_FILE));
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_current_span(true)
                .with_filter(filter(file_level));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let (json_layer, text_layer) = if json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_target(true)
            .with_filter(filter(stderr_level));
        (Some(layer), None)
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .with_target(false)
            .with_filter(filter(stderr_level));
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
