//! Logging setup
//!
//! The pipeline only emits `tracing` events; this module installs the sink
//! for hosts (the CLI) that want the usual stdout + rolling-file layout.

use std::path::Path;
use std::str::FromStr;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use super::{CoreError, CoreResult};

/// Log file prefix inside the log directory
pub const LOG_FILE_NAME: &str = "clip2audio.log";

/// Parses a level name such as `INFO` or `debug`.
pub fn parse_level(level: &str) -> CoreResult<Level> {
    Level::from_str(level.trim())
        .map_err(|_| CoreError::Config(format!("Unknown log level: {}", level.trim())))
}

/// Installs the global subscriber.
///
/// `RUST_LOG` directives take precedence over `level`. When `log_dir` is set,
/// a daily rolling file is written there as well; keep the returned guard
/// alive for the lifetime of the process so buffered lines are flushed.
pub fn init_logging(level: &str, log_dir: Option<&Path>) -> CoreResult<Option<WorkerGuard>> {
    let level = parse_level(level)?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(cfg!(debug_assertions));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                CoreError::Config(format!("cannot create log directory {}: {e}", dir.display()))
            })?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer);

    // Already initialized (tests) is not an error.
    let _ = tracing::subscriber::set_global_default(subscriber);

    Ok(guard)
}
