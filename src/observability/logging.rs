//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber from `LogConfig`
//! - Route access events and errors to their own sinks when configured
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, text format for development
//! - `RUST_LOG` overrides the configured level; `debug` forces debug

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::filter::{filter_fn, LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::{LogConfig, LogFormat};
use crate::http::request::ACCESS_LOG_TARGET;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum LoggingError {
    /// A log file could not be opened.
    #[error("cannot open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A global subscriber is already installed.
    #[error("logging already initialized: {0}")]
    Init(String),
}

/// Install the global subscriber.
pub fn init_logging(config: &LogConfig, debug: bool) -> Result<(), LoggingError> {
    let level = if debug { "debug" } else { config.level.as_str() };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let separate_access = config.access_log.is_some();
    let mut layers: Vec<BoxedLayer> = vec![sink(config.format, &config.output_log)?
        .with_filter(env_filter)
        .with_filter(filter_fn(move |meta| {
            !separate_access || meta.target() != ACCESS_LOG_TARGET
        }))
        .boxed()];

    if let Some(access_log) = &config.access_log {
        layers.push(
            sink(config.format, access_log)?
                .with_filter(filter_fn(|meta| meta.target() == ACCESS_LOG_TARGET))
                .boxed(),
        );
    }

    if let Some(error_log) = &config.error_log {
        layers.push(sink(config.format, error_log)?.with_filter(LevelFilter::ERROR).boxed());
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))
}

/// A formatting layer writing to `stdout`, `stderr` or a file path.
fn sink(format: LogFormat, output: &str) -> Result<BoxedLayer, LoggingError> {
    let layer = fmt::layer().with_target(true);
    let boxed = match (output, format) {
        ("stdout", LogFormat::Text) => layer.with_writer(std::io::stdout).boxed(),
        ("stdout", LogFormat::Json) => layer.json().with_writer(std::io::stdout).boxed(),
        ("stderr", LogFormat::Text) => layer.with_writer(std::io::stderr).boxed(),
        ("stderr", LogFormat::Json) => layer.json().with_writer(std::io::stderr).boxed(),
        (path, LogFormat::Text) => layer
            .with_ansi(false)
            .with_writer(Mutex::new(open(path)?))
            .boxed(),
        (path, LogFormat::Json) => layer.json().with_writer(Mutex::new(open(path)?)).boxed(),
    };
    Ok(boxed)
}

fn open(path: &str) -> Result<File, LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggingError::Open {
            path: PathBuf::from(path),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritable_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no/such/dir/server.log");
        let err = sink(LogFormat::Text, missing.to_str().unwrap()).err().unwrap();
        assert!(matches!(err, LoggingError::Open { .. }));
    }

    #[test]
    fn file_sink_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        assert!(sink(LogFormat::Json, path.to_str().unwrap()).is_ok());
        assert!(path.exists());
    }
}
