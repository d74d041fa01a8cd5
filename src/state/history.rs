//! In-memory state history
//!
//! Stores every interval produced by a state provider, grouped by quark and
//! sorted by start time, and answers the three query shapes the viewers need:
//!
//! - single: value of one attribute at one instant
//! - full: value of every attribute at one instant
//! - range: every interval of one attribute intersecting a window
//!
//! Snapshot format:
//! ```text
//! magic: [u8; 4] = "TSSH"
//! version: u16
//! payload_size: u32
//! payload: lz4(bincode(SnapshotData))
//! checksum: u32 (CRC32 of payload)
//! ```

use crate::state::collection::IntervalCollection;
use crate::state::error::{StateError, StateResult};
use crate::state::interval::{Quark, StateInterval};
use crate::types::{TimeRange, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const SNAPSHOT_MAGIC: [u8; 4] = *b"TSSH";
const SNAPSHOT_VERSION: u16 = 1;
/// magic + version + payload size
const SNAPSHOT_PREFIX_SIZE: u64 = 10;
const SNAPSHOT_CHECKSUM_SIZE: u64 = 4;

#[derive(Serialize, Deserialize)]
struct SnapshotData {
    range: TimeRange,
    intervals: Vec<StateInterval>,
}

/// Interval store with point and range queries
#[derive(Debug, Default)]
pub struct StateHistory {
    /// quark -> intervals sorted by start
    attributes: BTreeMap<Quark, Vec<StateInterval>>,
    range: TimeRange,
    interval_count: usize,
}

impl StateHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an interval
    pub fn insert(&mut self, interval: StateInterval) -> StateResult<()> {
        self.range.expand_to(interval.start());
        self.range.expand_to(interval.end());

        let intervals = self.attributes.entry(interval.quark()).or_default();
        let pos = intervals.partition_point(|i| i.start() <= interval.start());
        intervals.insert(pos, interval);
        self.interval_count += 1;
        Ok(())
    }

    /// Number of attributes with at least one interval
    pub fn nb_attributes(&self) -> usize {
        self.attributes.len()
    }

    /// Quarks with recorded history, ascending
    pub fn quarks(&self) -> impl Iterator<Item = Quark> + '_ {
        self.attributes.keys().copied()
    }

    pub fn interval_count(&self) -> usize {
        self.interval_count
    }

    /// Span covered by all recorded intervals
    pub fn time_range(&self) -> TimeRange {
        self.range
    }

    fn check_time(&self, time: Timestamp) -> StateResult<()> {
        if !self.range.contains(time) {
            return Err(StateError::TimeRange {
                time,
                start: self.range.start,
                end: self.range.end,
            });
        }
        Ok(())
    }

    fn intervals_of(&self, quark: Quark) -> StateResult<&[StateInterval]> {
        self.attributes
            .get(&quark)
            .map(Vec::as_slice)
            .ok_or(StateError::AttributeNotFound(quark))
    }

    /// Interval of `quark` covering `time`, if any
    pub fn query_single(
        &self,
        time: Timestamp,
        quark: Quark,
    ) -> StateResult<Option<&StateInterval>> {
        self.check_time(time)?;
        let intervals = self.intervals_of(quark)?;

        let candidates = intervals.partition_point(|i| i.start() <= time);
        Ok(intervals[..candidates]
            .iter()
            .rev()
            .find(|i| i.intersects(time)))
    }

    /// State of every known attribute at `time`, ordered by quark
    pub fn query_full_state(
        &self,
        time: Timestamp,
    ) -> StateResult<Vec<(Quark, Option<StateInterval>)>> {
        self.check_time(time)?;

        let mut state = Vec::with_capacity(self.attributes.len());
        for &quark in self.attributes.keys() {
            let interval = self.query_single(time, quark)?;
            state.push((quark, interval.cloned()));
        }
        Ok(state)
    }

    /// Every interval of `quark` intersecting `[start, end]`, ordered by start
    pub fn query_range(
        &self,
        quark: Quark,
        start: Timestamp,
        end: Timestamp,
    ) -> StateResult<Vec<StateInterval>> {
        if start > end {
            return Err(StateError::InvalidInterval { start, end });
        }
        let intervals = self.intervals_of(quark)?;

        let upper = intervals.partition_point(|i| i.start() <= end);
        Ok(intervals[..upper]
            .iter()
            .filter(|i| i.overlaps(start, end))
            .cloned()
            .collect())
    }

    /// All intervals intersecting `time`, as a transient collection
    pub fn query_collection(&self, time: Timestamp) -> StateResult<IntervalCollection> {
        self.check_time(time)?;

        Ok(self
            .attributes
            .values()
            .flatten()
            .filter(|i| i.intersects(time))
            .cloned()
            .collect())
    }

    /// Persist every interval to `path`
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> StateResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = SnapshotData {
            range: self.range,
            intervals: self.attributes.values().flatten().cloned().collect(),
        };
        let serialized = bincode::serialize(&data)?;
        let payload = lz4_flex::compress_prepend_size(&serialized);
        let checksum = crc32fast::hash(&payload);

        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&SNAPSHOT_MAGIC)?;
        writer.write_all(&SNAPSHOT_VERSION.to_le_bytes())?;
        writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        writer.write_all(&payload)?;
        writer.write_all(&checksum.to_le_bytes())?;
        writer.flush()?;

        tracing::debug!(
            "Saved state snapshot with {} intervals to {:?}",
            data.intervals.len(),
            path
        );
        Ok(())
    }

    /// Rebuild a history from a snapshot written by [`save_snapshot`](Self::save_snapshot)
    pub fn load_snapshot(path: impl AsRef<Path>) -> StateResult<Self> {
        let file = File::open(path.as_ref())?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != SNAPSHOT_MAGIC {
            return Err(StateError::Corruption(format!("Invalid magic: {:?}", magic)));
        }

        let mut version_buf = [0u8; 2];
        reader.read_exact(&mut version_buf)?;
        let version = u16::from_le_bytes(version_buf);
        if version > SNAPSHOT_VERSION {
            return Err(StateError::Corruption(format!(
                "Unsupported snapshot version: {}",
                version
            )));
        }

        let mut size_buf = [0u8; 4];
        reader.read_exact(&mut size_buf)?;
        let payload_size = u64::from(u32::from_le_bytes(size_buf));
        if SNAPSHOT_PREFIX_SIZE + payload_size + SNAPSHOT_CHECKSUM_SIZE > file_size {
            return Err(StateError::Corruption(format!(
                "Snapshot payload of {} bytes exceeds file size {}",
                payload_size, file_size
            )));
        }
        let mut payload = vec![0u8; payload_size as usize];
        reader.read_exact(&mut payload)?;

        let mut checksum_buf = [0u8; 4];
        reader.read_exact(&mut checksum_buf)?;
        if u32::from_le_bytes(checksum_buf) != crc32fast::hash(&payload) {
            return Err(StateError::Corruption("Snapshot checksum mismatch".into()));
        }

        let serialized = lz4_flex::decompress_size_prepended(&payload)
            .map_err(|e| StateError::Corruption(e.to_string()))?;
        let data: SnapshotData = bincode::deserialize(&serialized)?;

        let mut history = Self::new();
        for interval in data.intervals {
            history.insert(interval)?;
        }
        // Keep the recorded span even if it was wider than the intervals
        history.range = history.range.union(&data.range);
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::value::StateValue;
    use tempfile::tempdir;

    /// Two threads (quarks 0, 1) and a counter (quark 2) over [0, 100]
    fn sample_history() -> StateHistory {
        let mut history = StateHistory::new();
        let intervals = [
            (0, 49, 0, StateValue::string("running")),
            (50, 100, 0, StateValue::string("blocked")),
            (0, 9, 1, StateValue::null()),
            (10, 100, 1, StateValue::string("running")),
            (0, 24, 2, StateValue::int64(0)),
            (25, 74, 2, StateValue::int64(1)),
            (75, 100, 2, StateValue::int64(2)),
        ];
        // Insert out of order to exercise sorting
        for (start, end, quark, value) in intervals.into_iter().rev() {
            history
                .insert(StateInterval::new(start, end, quark, value).unwrap())
                .unwrap();
        }
        history
    }

    #[test]
    fn test_query_single() {
        let history = sample_history();
        assert_eq!(history.time_range(), TimeRange::new(0, 100));

        let interval = history.query_single(49, 0).unwrap().unwrap();
        assert_eq!(interval.value(), &StateValue::string("running"));

        let interval = history.query_single(50, 0).unwrap().unwrap();
        assert_eq!(interval.value(), &StateValue::string("blocked"));

        let interval = history.query_single(100, 2).unwrap().unwrap();
        assert_eq!(interval.value(), &StateValue::int64(2));
    }

    #[test]
    fn test_query_outside_range() {
        let history = sample_history();
        assert!(matches!(
            history.query_single(101, 0),
            Err(StateError::TimeRange { time: 101, .. })
        ));
        assert!(matches!(
            history.query_single(5, 9),
            Err(StateError::AttributeNotFound(9))
        ));
    }

    #[test]
    fn test_query_full_state() {
        let history = sample_history();
        let state = history.query_full_state(30).unwrap();

        assert_eq!(state.len(), 3);
        let quarks: Vec<Quark> = state.iter().map(|(quark, _)| *quark).collect();
        assert_eq!(quarks, vec![0, 1, 2]);
        assert_eq!(
            state[0].1.as_ref().unwrap().value(),
            &StateValue::string("running")
        );
        assert_eq!(
            state[1].1.as_ref().unwrap().value(),
            &StateValue::string("running")
        );
        assert_eq!(state[2].1.as_ref().unwrap().value(), &StateValue::int64(1));
    }

    #[test]
    fn test_sparse_quarks() {
        let mut history = StateHistory::new();
        history
            .insert(StateInterval::new(0, 10, 1_000_000_000, 1).unwrap())
            .unwrap();
        history
            .insert(StateInterval::new(0, 10, -7, StateValue::string("idle")).unwrap())
            .unwrap();

        assert_eq!(history.nb_attributes(), 2);
        assert_eq!(history.quarks().collect::<Vec<_>>(), vec![-7, 1_000_000_000]);

        let interval = history.query_single(5, 1_000_000_000).unwrap().unwrap();
        assert_eq!(interval.value(), &StateValue::int32(1));

        let state = history.query_full_state(5).unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(state[1].0, 1_000_000_000);
        assert!(matches!(
            history.query_single(5, 3),
            Err(StateError::AttributeNotFound(3))
        ));
    }

    #[test]
    fn test_query_range() {
        let history = sample_history();

        let intervals = history.query_range(2, 20, 80).unwrap();
        let starts: Vec<i64> = intervals.iter().map(|i| i.start()).collect();
        assert_eq!(starts, vec![0, 25, 75]);

        let intervals = history.query_range(2, 25, 74).unwrap();
        assert_eq!(intervals.len(), 1);

        assert!(history.query_range(2, 80, 20).is_err());
    }

    #[test]
    fn test_query_collection() {
        let history = sample_history();
        let collection = history.query_collection(5).unwrap();

        assert_eq!(collection.len(), 3);
        let counter = collection.get(5, 2).unwrap().unwrap();
        assert_eq!(counter.value(), &StateValue::int64(0));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.snap");

        let history = sample_history();
        history.save_snapshot(&path).unwrap();

        let restored = StateHistory::load_snapshot(&path).unwrap();
        assert_eq!(restored.interval_count(), history.interval_count());
        assert_eq!(restored.time_range(), history.time_range());
        assert_eq!(
            restored.query_full_state(60).unwrap(),
            history.query_full_state(60).unwrap()
        );
    }

    #[test]
    fn test_snapshot_oversized_payload_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.snap");
        sample_history().save_snapshot(&path).unwrap();

        // Payload size claims nearly 4 GiB
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[6..10].copy_from_slice(&(u32::MAX - 1).to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        match StateHistory::load_snapshot(&path) {
            Err(StateError::Corruption(msg)) => assert!(msg.contains("exceeds file size")),
            other => panic!("unexpected result: {:?}", other.map(|h| h.interval_count())),
        }
    }

    #[test]
    fn test_snapshot_corruption_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.snap");
        sample_history().save_snapshot(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 6;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            StateHistory::load_snapshot(&path),
            Err(StateError::Corruption(_))
        ));
    }
}
