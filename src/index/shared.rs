//! Shared handle over a checkpoint index
//!
//! One [`IndexWriter`] inserts while any number of cloned
//! [`SharedCheckpointIndex`] readers query. Readers only see ranks whose
//! insert has been confirmed.

use crate::index::{Checkpoint, CheckpointIndex, IndexError, IndexResult, IndexStats, Location};
use crate::types::{TimeRange, Timestamp};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Clonable reader over a boxed checkpoint index
pub struct SharedCheckpointIndex<L: Location> {
    inner: Arc<RwLock<Box<dyn CheckpointIndex<L>>>>,
    confirmed: Arc<AtomicU64>,
    writer_taken: Arc<AtomicBool>,
}

impl<L: Location> Clone for SharedCheckpointIndex<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            confirmed: Arc::clone(&self.confirmed),
            writer_taken: Arc::clone(&self.writer_taken),
        }
    }
}

impl<L: Location> SharedCheckpointIndex<L> {
    pub fn new(index: Box<dyn CheckpointIndex<L>>) -> Self {
        let confirmed = index.size();
        Self {
            inner: Arc::new(RwLock::new(index)),
            confirmed: Arc::new(AtomicU64::new(confirmed)),
            writer_taken: Arc::new(AtomicBool::new(false)),
        }
    }

    fn read(&self) -> IndexResult<RwLockReadGuard<'_, Box<dyn CheckpointIndex<L>>>> {
        self.inner
            .read()
            .map_err(|e| IndexError::Lock(e.to_string()))
    }

    fn write(&self) -> IndexResult<RwLockWriteGuard<'_, Box<dyn CheckpointIndex<L>>>> {
        self.inner
            .write()
            .map_err(|e| IndexError::Lock(e.to_string()))
    }

    /// Take the single writer. Fails with [`IndexError::WriterTaken`] while
    /// another writer is alive.
    pub fn writer(&self) -> IndexResult<IndexWriter<L>> {
        self.writer_taken
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| IndexError::WriterTaken)?;
        Ok(IndexWriter {
            shared: self.clone(),
        })
    }

    /// Number of checkpoints readers may access
    pub fn confirmed_size(&self) -> u64 {
        self.confirmed.load(Ordering::Acquire)
    }

    pub fn get(&self, rank: u64) -> IndexResult<Checkpoint<L>> {
        let size = self.confirmed_size();
        if rank >= size {
            return Err(IndexError::OutOfRange { rank, size });
        }
        self.read()?.get(rank)
    }

    pub fn find(&self, timestamp: Timestamp) -> IndexResult<Result<u64, u64>> {
        self.read()?.find(timestamp)
    }

    pub fn time_range(&self) -> IndexResult<TimeRange> {
        Ok(self.read()?.time_range())
    }

    pub fn nb_events(&self) -> IndexResult<u64> {
        Ok(self.read()?.nb_events())
    }

    pub fn is_complete(&self) -> IndexResult<bool> {
        Ok(self.read()?.is_complete())
    }

    pub fn is_created_from_scratch(&self) -> IndexResult<bool> {
        Ok(self.read()?.is_created_from_scratch())
    }

    pub fn stats(&self) -> IndexResult<IndexStats> {
        Ok(self.read()?.stats())
    }

    /// Release the underlying index for every handle
    pub fn dispose(&self) -> IndexResult<()> {
        self.write()?.dispose()
    }
}

/// The single producer of a [`SharedCheckpointIndex`]
///
/// Dropping the writer lets another one be taken.
pub struct IndexWriter<L: Location> {
    shared: SharedCheckpointIndex<L>,
}

impl<L: Location> IndexWriter<L> {
    /// Insert and confirm a checkpoint. Returns its rank.
    pub fn insert(&mut self, checkpoint: Checkpoint<L>) -> IndexResult<u64> {
        let mut index = self.shared.write()?;
        let rank = index.insert(checkpoint)?;
        self.shared.confirmed.store(index.size(), Ordering::Release);
        Ok(rank)
    }

    pub fn set_time_range(&mut self, range: TimeRange) -> IndexResult<()> {
        self.shared.write()?.set_time_range(range);
        Ok(())
    }

    pub fn set_nb_events(&mut self, nb_events: u64) -> IndexResult<()> {
        self.shared.write()?.set_nb_events(nb_events);
        Ok(())
    }

    pub fn set_index_complete(&mut self) -> IndexResult<()> {
        self.shared.write()?.set_index_complete()
    }

    /// Reader view sharing this writer's index
    pub fn reader(&self) -> SharedCheckpointIndex<L> {
        self.shared.clone()
    }
}

impl<L: Location> Drop for IndexWriter<L> {
    fn drop(&mut self) {
        self.shared.writer_taken.store(false, Ordering::Release);
    }
}
