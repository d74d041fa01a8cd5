//! Shared time and trace identity types
//!
//! Trace timestamps are signed 64-bit integers (nanoseconds in most traces,
//! but the engine never interprets the unit).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::UNIX_EPOCH;

/// A trace timestamp
pub type Timestamp = i64;

/// Closed time range `[start, end]`
///
/// Unlike a query window, a trace time range includes both of its bounds:
/// a trace whose first and last events share a timestamp still spans one
/// instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// First timestamp covered (inclusive)
    pub start: Timestamp,
    /// Last timestamp covered (inclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// The "nothing seen yet" range. Widening it with any timestamp yields
    /// a single-instant range.
    pub const NULL: TimeRange = TimeRange {
        start: Timestamp::MAX,
        end: Timestamp::MIN,
    };

    /// Range covering every representable timestamp
    pub const ETERNITY: TimeRange = TimeRange {
        start: Timestamp::MIN,
        end: Timestamp::MAX,
    };

    /// Create a new time range
    ///
    /// # Panics
    /// Panics if start > end
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        assert!(start <= end, "TimeRange: start must not exceed end");
        Self { start, end }
    }

    /// Create a time range, returning None if invalid
    pub fn try_new(start: Timestamp, end: Timestamp) -> Option<Self> {
        if start <= end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Whether this is the sentinel produced before any timestamp was seen
    pub fn is_null(&self) -> bool {
        self.start > self.end
    }

    /// Check if a timestamp falls within this range (both ends inclusive)
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Check if this range intersects another
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Widen the range so that it covers `timestamp`
    pub fn expand_to(&mut self, timestamp: Timestamp) {
        self.start = self.start.min(timestamp);
        self.end = self.end.max(timestamp);
    }

    /// Smallest range covering both
    pub fn union(&self, other: &TimeRange) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Get intersection with another range, if any
    pub fn intersection(&self, other: &TimeRange) -> Option<Self> {
        Self::try_new(self.start.max(other.start), self.end.min(other.end))
    }

    /// Length of the range (0 for a single instant, 0 for the null range)
    pub fn duration(&self) -> u64 {
        if self.is_null() {
            0
        } else {
            self.end.abs_diff(self.start)
        }
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        TimeRange::NULL
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "[null]")
        } else {
            write!(f, "[{}, {}]", self.start, self.end)
        }
    }
}

/// Identity of a trace's on-disk content, stored in index headers.
///
/// A persisted index is only reused when the signature recorded at build
/// time equals the trace's current signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TraceSignature {
    /// Total size of the trace in bytes
    pub byte_size: u64,
    /// Last modification time, nanoseconds since the Unix epoch
    pub modified: i64,
}

impl TraceSignature {
    pub fn new(byte_size: u64, modified: i64) -> Self {
        Self {
            byte_size,
            modified,
        }
    }

    /// Signature of a trace file or directory, from filesystem metadata
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let modified = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Ok(Self {
            byte_size: metadata.len(),
            modified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_contains_is_closed() {
        let range = TimeRange::new(1000, 2000);

        assert!(!range.contains(999));
        assert!(range.contains(1000));
        assert!(range.contains(1500));
        assert!(range.contains(2000));
        assert!(!range.contains(2001));
    }

    #[test]
    fn test_null_range_expands() {
        let mut range = TimeRange::NULL;
        assert!(range.is_null());
        assert_eq!(range.duration(), 0);

        range.expand_to(42);
        assert_eq!(range, TimeRange::new(42, 42));

        range.expand_to(10);
        range.expand_to(50);
        assert_eq!(range, TimeRange::new(10, 50));
        assert_eq!(range.duration(), 40);
    }

    #[test]
    fn test_signature_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.bin");
        std::fs::write(&path, [0u8; 128]).unwrap();

        let signature = TraceSignature::from_path(&path).unwrap();
        assert_eq!(signature.byte_size, 128);
        assert_eq!(signature, TraceSignature::from_path(&path).unwrap());
        assert!(TraceSignature::from_path(dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_time_range_overlaps() {
        let range1 = TimeRange::new(1000, 2000);
        let range2 = TimeRange::new(2000, 3000);
        let range3 = TimeRange::new(2001, 3000);

        assert!(range1.overlaps(&range2)); // Shared endpoint
        assert!(!range1.overlaps(&range3));
        assert_eq!(
            range1.intersection(&range2),
            Some(TimeRange::new(2000, 2000))
        );
        assert_eq!(range1.intersection(&range3), None);
        assert_eq!(range1.union(&range3), TimeRange::new(1000, 3000));
    }
}
