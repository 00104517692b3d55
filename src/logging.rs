//! Log subscriber setup
//!
//! `RUST_LOG` takes precedence over the configured level.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Errors setting up logging
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to install log subscriber: {0}")]
    Init(String),
}

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    Stdout,
    File(PathBuf),
}

impl LogTarget {
    /// Parse a `log_file` setting: `stderr` or empty, `stdout` or `-`, or a path
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" | "stderr" => LogTarget::Stderr,
            "stdout" | "-" => LogTarget::Stdout,
            path => LogTarget::File(PathBuf::from(path)),
        }
    }

    fn writer(&self) -> Result<BoxMakeWriter, LoggingError> {
        Ok(match self {
            LogTarget::Stderr => BoxMakeWriter::new(io::stderr),
            LogTarget::Stdout => BoxMakeWriter::new(io::stdout),
            LogTarget::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| LoggingError::Open {
                        path: path.clone(),
                        source,
                    })?;
                BoxMakeWriter::new(Mutex::new(file))
            }
        })
    }
}

/// Install the global subscriber
///
/// Can only succeed once per process.
pub fn init_logging(level: &str, log_file: &str) -> Result<(), LoggingError> {
    let target = LogTarget::parse(log_file);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(target.writer()?)
        .with_ansi(target == LogTarget::Stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))
}
