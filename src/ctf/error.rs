//! Packet index error types

use thiserror::Error;

/// Errors raised while building or searching a stream packet index
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketIndexError {
    /// Entry rejected because it would break the begin-timestamp order
    #[error("Reader error: {0}")]
    Reader(String),

    /// Search argument out of domain
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type alias for packet index operations
pub type PacketIndexResult<T> = Result<T, PacketIndexError>;
