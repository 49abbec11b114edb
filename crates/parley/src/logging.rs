//! Tracing subscriber setup.

use crate::{AppError, AppResult, config::LoggingConfig};

use std::panic::Location;

use error_location::ErrorLocation;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt::writer::BoxMakeWriter};

/// File name prefix for rolling log files.
const LOG_FILE_PREFIX: &str = "parley.log";

/// Builds the filter: `RUST_LOG` wins, then the configured directives.
#[track_caller]
pub(crate) fn env_filter(config: &LoggingConfig) -> AppResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| AppError::LoggingError {
            reason: format!("Invalid log filter '{}': {}", config.filter, e),
            location: ErrorLocation::from(Location::caller()),
        }),
    }
}

/// Installs the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
#[track_caller]
pub(crate) fn init(config: &LoggingConfig) -> AppResult<Option<WorkerGuard>> {
    let filter = env_filter(config)?;

    let (writer, guard) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(config.directory.is_none());

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| AppError::LoggingError {
        reason: e.to_string(),
        location: ErrorLocation::from(Location::caller()),
    })?;

    Ok(guard)
}
