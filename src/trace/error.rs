//! Trace and indexer error types

use crate::index::IndexError;
use thiserror::Error;

/// Errors raised while reading traces or driving the checkpoint indexer
#[derive(Error, Debug)]
pub enum TraceError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Checkpoint index failure
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Trace file not in the expected layout
    #[error("Invalid trace format: {0}")]
    InvalidFormat(String),

    /// Invalid indexer settings
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<crate::config::ConfigError> for TraceError {
    fn from(err: crate::config::ConfigError) -> Self {
        TraceError::Config(err.to_string())
    }
}

/// Result type alias for trace operations
pub type TraceResult<T> = Result<T, TraceError>;
