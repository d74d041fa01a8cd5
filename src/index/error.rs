//! Checkpoint index error types

use thiserror::Error;

/// Errors that can occur in the checkpoint index layer
#[derive(Error, Debug)]
pub enum IndexError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected (checksum mismatch, invalid magic, etc.)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Index file written by an incompatible layout
    #[error("Invalid index format: {0}")]
    InvalidFormat(String),

    /// Rank beyond the last inserted checkpoint
    #[error("Rank {rank} out of range (size {size})")]
    OutOfRange { rank: u64, size: u64 },

    /// Index used after `dispose()`
    #[error("Index has been disposed")]
    Closed,

    /// A second writer was requested for a shared index
    #[error("Index already has an active writer")]
    WriterTaken,

    /// Invalid index options
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexError::OutOfRange { rank: 12, size: 10 };
        assert_eq!(err.to_string(), "Rank 12 out of range (size 10)");

        let err = IndexError::Closed;
        assert_eq!(err.to_string(), "Index has been disposed");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let index_err: IndexError = io_err.into();
        assert!(matches!(index_err, IndexError::Io(_)));
    }
}
