//! State system error types

use crate::state::value::StateValueType;
use crate::types::Timestamp;
use thiserror::Error;

/// Errors raised by state values, intervals and history queries
#[derive(Error, Debug)]
pub enum StateError {
    /// A value was unboxed or combined as the wrong variant
    #[error("State value type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: StateValueType,
        found: StateValueType,
    },

    /// Query timestamp outside the range covered by the queried data
    #[error("Time {time} is outside of range ({start}, {end})")]
    TimeRange {
        time: Timestamp,
        start: Timestamp,
        end: Timestamp,
    },

    /// Interval with its end before its start
    #[error("Invalid interval: start {start} is after end {end}")]
    InvalidInterval { start: Timestamp, end: Timestamp },

    /// Quark has no recorded history
    #[error("Attribute not found: quark {0}")]
    AttributeNotFound(i32),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Snapshot corruption detected (checksum mismatch, invalid magic, etc.)
    #[error("Corrupt data: {0}")]
    Corruption(String),
}

impl From<bincode::Error> for StateError {
    fn from(err: bincode::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Result type alias for state operations
pub type StateResult<T> = Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StateError::TypeMismatch {
            expected: StateValueType::Int32,
            found: StateValueType::Int64,
        };
        assert_eq!(
            err.to_string(),
            "State value type mismatch: expected int32, found int64"
        );

        let err = StateError::TimeRange {
            time: 5,
            start: 10,
            end: 20,
        };
        assert_eq!(err.to_string(), "Time 5 is outside of range (10, 20)");
    }
}
