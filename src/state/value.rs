//! State values
//!
//! A `StateValue` is the payload of a state interval: nothing, a 32-bit
//! integer, a 64-bit integer or a string. Values are immutable; arithmetic
//! returns a new value.

use crate::state::error::{StateError, StateResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Variant tag of a [`StateValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateValueType {
    Null,
    Int32,
    Int64,
    String,
}

impl std::fmt::Display for StateValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateValueType::Null => write!(f, "null"),
            StateValueType::Int32 => write!(f, "int32"),
            StateValueType::Int64 => write!(f, "int64"),
            StateValueType::String => write!(f, "string"),
        }
    }
}

/// The value of an attribute over an interval
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StateValue {
    #[default]
    Null,
    Int32(i32),
    Int64(i64),
    String(String),
}

impl StateValue {
    pub fn null() -> Self {
        StateValue::Null
    }

    pub fn int32(value: i32) -> Self {
        StateValue::Int32(value)
    }

    pub fn int64(value: i64) -> Self {
        StateValue::Int64(value)
    }

    pub fn string(value: impl Into<String>) -> Self {
        StateValue::String(value.into())
    }

    pub fn value_type(&self) -> StateValueType {
        match self {
            StateValue::Null => StateValueType::Null,
            StateValue::Int32(_) => StateValueType::Int32,
            StateValue::Int64(_) => StateValueType::Int64,
            StateValue::String(_) => StateValueType::String,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }

    fn mismatch(&self, expected: StateValueType) -> StateError {
        StateError::TypeMismatch {
            expected,
            found: self.value_type(),
        }
    }

    pub fn unbox_int32(&self) -> StateResult<i32> {
        match self {
            StateValue::Int32(v) => Ok(*v),
            _ => Err(self.mismatch(StateValueType::Int32)),
        }
    }

    pub fn unbox_int64(&self) -> StateResult<i64> {
        match self {
            StateValue::Int64(v) => Ok(*v),
            _ => Err(self.mismatch(StateValueType::Int64)),
        }
    }

    pub fn unbox_str(&self) -> StateResult<&str> {
        match self {
            StateValue::String(v) => Ok(v),
            _ => Err(self.mismatch(StateValueType::String)),
        }
    }

    /// Compare two values.
    ///
    /// Null equals Null, and any other value compares greater than Null.
    /// Integers compare numerically across widths, strings lexically.
    /// Integers rank below strings so that the result stays a total order.
    pub fn compare(&self, other: &StateValue) -> Ordering {
        use StateValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Int32(a), Int32(b)) => a.cmp(b),
            (Int64(a), Int64(b)) => a.cmp(b),
            (Int32(a), Int64(b)) => i64::from(*a).cmp(b),
            (Int64(a), Int32(b)) => a.cmp(&i64::from(*b)),
            (String(a), String(b)) => a.cmp(b),
            (String(_), _) => Ordering::Greater,
            (_, String(_)) => Ordering::Less,
        }
    }

    /// Add two integer values.
    ///
    /// Same-width operands wrap on overflow. Mixing widths widens the result
    /// to 64 bits.
    pub fn add(&self, other: &StateValue) -> StateResult<StateValue> {
        use StateValue::*;
        match (self, other) {
            (Int32(a), Int32(b)) => Ok(Int32(a.wrapping_add(*b))),
            (Int64(a), Int64(b)) => Ok(Int64(a.wrapping_add(*b))),
            (Int32(a), Int64(b)) => Ok(Int64(i64::from(*a).wrapping_add(*b))),
            (Int64(a), Int32(b)) => Ok(Int64(a.wrapping_add(i64::from(*b)))),
            (Int32(_), _) => Err(other.mismatch(StateValueType::Int32)),
            (Int64(_), _) => Err(other.mismatch(StateValueType::Int64)),
            _ => Err(self.mismatch(StateValueType::Int64)),
        }
    }

    /// Add one to an integer value
    pub fn increment(&self) -> StateResult<StateValue> {
        match self {
            StateValue::Int32(v) => Ok(StateValue::Int32(v.wrapping_add(1))),
            StateValue::Int64(v) => Ok(StateValue::Int64(v.wrapping_add(1))),
            _ => Err(self.mismatch(StateValueType::Int64)),
        }
    }
}

impl PartialOrd for StateValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StateValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl From<i32> for StateValue {
    fn from(value: i32) -> Self {
        StateValue::Int32(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Int64(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::String(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::String(value)
    }
}

impl std::fmt::Display for StateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateValue::Null => write!(f, "nullValue"),
            StateValue::Int32(v) => write!(f, "{}", v),
            StateValue::Int64(v) => write!(f, "{}", v),
            StateValue::String(v) => write!(f, "{}", v),
        }
    }
}
