//! Tracing subscriber setup: compact console output plus an optional
//! daily-rotated log file.
//!
//! The file writer is blocking so that a line logged right before
//! `process::exit` is already on disk.

use std::path::Path;

use thiserror::Error;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{Layer, fmt};

use crate::constants::APP_NAME;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open rotating log file in {path}: {source}")]
    Appender {
        path: String,
        #[source]
        source: InitError,
    },
    #[error("tracing subscriber already initialised: {0}")]
    Init(#[from] TryInitError),
}

/// Daily rotating appender writing `{dir}/outfall.YYYY-MM-DD.log`.
pub fn rolling_appender(dir: &Path, max_log_files: usize) -> Result<RollingFileAppender, LoggingError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(APP_NAME)
        .filename_suffix("log")
        .max_log_files(max_log_files.max(1))
        .build(dir)
        .map_err(|source| LoggingError::Appender {
            path: dir.display().to_string(),
            source,
        })
}

/// Install the global subscriber. Console output goes to stderr; when
/// `log_dir` is given the same events are also written to a rotating file.
pub fn init(
    level: LevelFilter,
    log_dir: Option<&Path>,
    max_log_files: usize,
) -> Result<(), LoggingError> {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(level);

    let file = match log_dir {
        Some(dir) => Some(
            fmt::layer()
                .with_writer(rolling_appender(dir, max_log_files)?)
                .with_ansi(false)
                .with_target(true)
                .with_filter(level),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()?;

    if let Some(dir) = log_dir {
        tracing::debug!(dir = %dir.display(), "file logging initialised");
    }
    Ok(())
}
