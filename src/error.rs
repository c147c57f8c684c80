use std::path::PathBuf;
use thiserror::Error;

use crate::sink::SinkError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Malformed scan record {line:?}: {reason}")]
    HistoryRecord { line: String, reason: String },

    #[error("Precondition violated: {0}")]
    Precondition(String),

    #[error("Scan was already closed")]
    ScanClosed,

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("Could not delete {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }
}
