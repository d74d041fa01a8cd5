//! Memory Index - checkpoints in a `Vec`
//!
//! Never persisted: every session starts from scratch. Suited to small or
//! ephemeral traces where a rescan is cheap.

use crate::index::{
    search_sorted, Checkpoint, CheckpointIndex, IndexBackend, IndexError, IndexResult, Location,
};
use crate::types::{TimeRange, Timestamp};

/// In-memory checkpoint index
#[derive(Debug)]
pub struct MemoryCheckpointIndex<L> {
    checkpoints: Vec<Checkpoint<L>>,
    time_range: TimeRange,
    nb_events: u64,
    complete: bool,
    disposed: bool,
}

impl<L: Location> MemoryCheckpointIndex<L> {
    pub fn new() -> Self {
        Self {
            checkpoints: Vec::new(),
            time_range: TimeRange::NULL,
            nb_events: 0,
            complete: false,
            disposed: false,
        }
    }

    fn ensure_open(&self) -> IndexResult<()> {
        if self.disposed {
            Err(IndexError::Closed)
        } else {
            Ok(())
        }
    }
}

impl<L: Location> Default for MemoryCheckpointIndex<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Location> CheckpointIndex<L> for MemoryCheckpointIndex<L> {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Memory
    }

    fn insert(&mut self, mut checkpoint: Checkpoint<L>) -> IndexResult<u64> {
        self.ensure_open()?;
        let rank = self.checkpoints.len() as u64;
        checkpoint.rank = rank;
        self.checkpoints.push(checkpoint);
        Ok(rank)
    }

    fn get(&self, rank: u64) -> IndexResult<Checkpoint<L>> {
        self.ensure_open()?;
        usize::try_from(rank)
            .ok()
            .and_then(|i| self.checkpoints.get(i))
            .cloned()
            .ok_or(IndexError::OutOfRange {
                rank,
                size: self.size(),
            })
    }

    fn find(&self, timestamp: Timestamp) -> IndexResult<Result<u64, u64>> {
        self.ensure_open()?;
        search_sorted(self.size(), timestamp, |rank| {
            Ok(self.checkpoints[rank as usize].timestamp)
        })
    }

    fn size(&self) -> u64 {
        self.checkpoints.len() as u64
    }

    fn time_range(&self) -> TimeRange {
        self.time_range
    }

    fn set_time_range(&mut self, range: TimeRange) {
        self.time_range = range;
    }

    fn nb_events(&self) -> u64 {
        self.nb_events
    }

    fn set_nb_events(&mut self, nb_events: u64) {
        self.nb_events = nb_events;
    }

    fn is_created_from_scratch(&self) -> bool {
        true
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn set_index_complete(&mut self) -> IndexResult<()> {
        self.ensure_open()?;
        self.complete = true;
        Ok(())
    }

    fn dispose(&mut self) -> IndexResult<()> {
        self.checkpoints = Vec::new();
        self.disposed = true;
        Ok(())
    }
}
