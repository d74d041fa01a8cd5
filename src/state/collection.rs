//! Interval collection - transient result set of a state query
//!
//! Accumulates intervals in insertion order and tracks the span they cover.
//! Lookups are a linear scan: the first inserted interval that matches wins.

use crate::state::error::{StateError, StateResult};
use crate::state::interval::{Quark, StateInterval};
use crate::types::{TimeRange, Timestamp};

/// Insertion-ordered accumulator of intervals over a time span
#[derive(Debug, Clone)]
pub struct IntervalCollection {
    intervals: Vec<StateInterval>,
    start: Timestamp,
    end: Timestamp,
}

impl IntervalCollection {
    pub fn new() -> Self {
        Self {
            intervals: Vec::new(),
            start: Timestamp::MAX,
            end: Timestamp::MIN,
        }
    }

    /// Append an interval and widen the covered span
    pub fn add(&mut self, interval: StateInterval) {
        self.start = self.start.min(interval.start());
        self.end = self.end.max(interval.end());
        self.intervals.push(interval);
    }

    pub fn add_all(&mut self, intervals: impl IntoIterator<Item = StateInterval>) {
        for interval in intervals {
            self.add(interval);
        }
    }

    /// Find the first interval of `quark` that contains `time`.
    ///
    /// `time` must lie strictly inside the accumulated span: the span's own
    /// endpoints are rejected with [`StateError::TimeRange`].
    pub fn get(&self, time: Timestamp, quark: Quark) -> StateResult<Option<&StateInterval>> {
        if time <= self.start || time >= self.end {
            return Err(StateError::TimeRange {
                time,
                start: self.start,
                end: self.end,
            });
        }

        Ok(self
            .intervals
            .iter()
            .find(|interval| interval.quark() == quark && interval.intersects(time)))
    }

    /// Intervals in insertion order
    pub fn list(&self) -> &[StateInterval] {
        &self.intervals
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// Covered span; [`TimeRange::NULL`] when empty
    pub fn time_range(&self) -> TimeRange {
        TimeRange {
            start: self.start,
            end: self.end,
        }
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Drop every interval and return to the empty sentinel span
    pub fn clear(&mut self) {
        self.start = Timestamp::MAX;
        self.end = Timestamp::MIN;
        self.intervals.clear();
    }
}

impl Default for IntervalCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<StateInterval> for IntervalCollection {
    fn from_iter<I: IntoIterator<Item = StateInterval>>(iter: I) -> Self {
        let mut collection = Self::new();
        collection.add_all(iter);
        collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::value::StateValue;

    fn interval(start: i64, end: i64, quark: Quark, value: i32) -> StateInterval {
        StateInterval::new(start, end, quark, value).unwrap()
    }

    #[test]
    fn test_bounds_tracking() {
        let mut collection = IntervalCollection::new();
        assert!(collection.time_range().is_null());

        collection.add(interval(10, 20, 0, 1));
        collection.add(interval(5, 12, 1, 2));
        collection.add(interval(15, 30, 0, 3));

        assert_eq!(collection.start(), 5);
        assert_eq!(collection.end(), 30);
        assert_eq!(collection.len(), 3);
    }

    #[test]
    fn test_exact_bounds_are_rejected() {
        let mut collection = IntervalCollection::new();
        collection.add(interval(10, 20, 7, 1));

        assert!(matches!(
            collection.get(10, 7),
            Err(StateError::TimeRange { time: 10, .. })
        ));
        assert!(matches!(
            collection.get(20, 7),
            Err(StateError::TimeRange { time: 20, .. })
        ));

        let found = collection.get(15, 7).unwrap().unwrap();
        assert_eq!(found.start(), 10);
        assert_eq!(found.end(), 20);
    }

    #[test]
    fn test_first_inserted_match_wins() {
        let mut collection = IntervalCollection::new();
        collection.add(interval(0, 100, 1, 1));
        collection.add(interval(40, 60, 1, 2));

        let found = collection.get(50, 1).unwrap().unwrap();
        assert_eq!(found.value(), &StateValue::int32(1));
    }

    #[test]
    fn test_missing_attribute_returns_none() {
        let collection: IntervalCollection =
            vec![interval(0, 100, 1, 1), interval(0, 50, 2, 9)]
                .into_iter()
                .collect();

        assert!(collection.get(50, 3).unwrap().is_none());
        // Attribute 2 ends before the query time
        assert!(collection.get(75, 2).unwrap().is_none());
    }

    #[test]
    fn test_clear_resets_to_sentinel() {
        let mut collection = IntervalCollection::new();
        collection.add(interval(0, 100, 1, 1));
        collection.clear();

        assert!(collection.is_empty());
        assert_eq!(collection.start(), i64::MAX);
        assert_eq!(collection.end(), i64::MIN);
        assert!(collection.get(50, 1).is_err());
    }
}
