//! State intervals
//!
//! An interval records that attribute `quark` held `value` from `start` to
//! `end`, both inclusive.

use crate::state::error::{StateError, StateResult};
use crate::state::value::StateValue;
use crate::types::{TimeRange, Timestamp};
use serde::{Deserialize, Serialize};

/// Opaque handle of an attribute in the attribute tree
pub type Quark = i32;

/// Immutable `(start, end, attribute, value)` record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateInterval {
    start: Timestamp,
    end: Timestamp,
    quark: Quark,
    value: StateValue,
}

impl StateInterval {
    /// Create an interval, rejecting `start > end`
    pub fn new(
        start: Timestamp,
        end: Timestamp,
        quark: Quark,
        value: impl Into<StateValue>,
    ) -> StateResult<Self> {
        if start > end {
            return Err(StateError::InvalidInterval { start, end });
        }
        Ok(Self {
            start,
            end,
            quark,
            value: value.into(),
        })
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    pub fn quark(&self) -> Quark {
        self.quark
    }

    pub fn value(&self) -> &StateValue {
        &self.value
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange {
            start: self.start,
            end: self.end,
        }
    }

    /// Whether `timestamp` lies within `[start, end]`
    pub fn intersects(&self, timestamp: Timestamp) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }

    /// Whether the interval overlaps `[start, end]`
    pub fn overlaps(&self, start: Timestamp, end: Timestamp) -> bool {
        self.start <= end && self.end >= start
    }
}

impl std::fmt::Display for StateInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}], attribute = {}, value = {}",
            self.start, self.end, self.quark, self.value
        )
    }
}
