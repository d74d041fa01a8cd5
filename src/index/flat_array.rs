//! Flat-Array Index - fixed-size checkpoint records in a supplementary file
//!
//! Layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (64 bytes, see header.rs)        │
//! ├─────────────────────────────────────────┤
//! │ RECORDS                                 │
//! │   record[rank] at 64 + rank * size:     │
//! │     timestamp: i64                      │
//! │     rank: u64                           │
//! │     location: [u8; L::ENCODED_SIZE]     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! `get(rank)` is a single seek. `find` binary-searches the records, which is
//! only meaningful when checkpoints were inserted in timestamp order.

use crate::index::error::{IndexError, IndexResult};
use crate::index::header::{self, IndexHeader, FLAT_ARRAY_MAGIC, HEADER_SIZE};
use crate::index::{
    search_sorted, Checkpoint, CheckpointIndex, IndexBackend, IndexOptions, Location,
};
use crate::types::{TimeRange, Timestamp, TraceSignature};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Recently read records, dropped wholesale when full
struct RecordCache<L> {
    entries: HashMap<u64, Checkpoint<L>>,
    capacity: usize,
}

impl<L: Location> RecordCache<L> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    fn get(&self, rank: u64) -> Option<Checkpoint<L>> {
        self.entries.get(&rank).cloned()
    }

    fn put(&mut self, checkpoint: Checkpoint<L>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.clear();
        }
        self.entries.insert(checkpoint.rank, checkpoint);
    }
}

struct ArrayIo<L> {
    file: File,
    cache: RecordCache<L>,
}

/// Append-only file of fixed-size checkpoint records, addressed by rank
pub struct FlatArray<L: Location> {
    path: PathBuf,
    header: IndexHeader,
    io: Option<Mutex<ArrayIo<L>>>,
    created_from_scratch: bool,
}

impl<L: Location> FlatArray<L> {
    /// Open the array at `path`, reusing it when it is complete and matches
    /// `signature`, otherwise starting an empty one
    pub fn open(
        path: impl AsRef<Path>,
        signature: TraceSignature,
        cache_size: usize,
    ) -> IndexResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut opened =
            header::open_or_create(&path, FLAT_ARRAY_MAGIC, L::ENCODED_SIZE, signature)?;

        if !opened.created_from_scratch {
            let expected =
                HEADER_SIZE as u64 + opened.header.size * Checkpoint::<L>::record_size() as u64;
            let actual = opened.file.metadata()?.len();
            if actual < expected {
                tracing::warn!(
                    "Flat array {:?} truncated ({} < {} bytes), rebuilding",
                    path,
                    actual,
                    expected
                );
                drop(opened);
                opened = header::create(&path, FLAT_ARRAY_MAGIC, L::ENCODED_SIZE, signature)?;
            }
        }

        Ok(Self::from_opened(path, opened, cache_size))
    }

    /// Start an empty array at `path`, discarding whatever the file held
    pub fn create(
        path: impl AsRef<Path>,
        signature: TraceSignature,
        cache_size: usize,
    ) -> IndexResult<Self> {
        let path = path.as_ref().to_path_buf();
        let opened = header::create(&path, FLAT_ARRAY_MAGIC, L::ENCODED_SIZE, signature)?;
        Ok(Self::from_opened(path, opened, cache_size))
    }

    fn from_opened(path: PathBuf, opened: header::OpenedFile, cache_size: usize) -> Self {
        Self {
            path,
            header: opened.header,
            io: Some(Mutex::new(ArrayIo {
                file: opened.file,
                cache: RecordCache::new(cache_size),
            })),
            created_from_scratch: opened.created_from_scratch,
        }
    }

    fn io(&self) -> IndexResult<MutexGuard<'_, ArrayIo<L>>> {
        self.io
            .as_ref()
            .ok_or(IndexError::Closed)?
            .lock()
            .map_err(|e| IndexError::Lock(e.to_string()))
    }

    fn io_mut(&mut self) -> IndexResult<&mut ArrayIo<L>> {
        self.io
            .as_mut()
            .ok_or(IndexError::Closed)?
            .get_mut()
            .map_err(|e| IndexError::Lock(e.to_string()))
    }

    fn offset_of(rank: u64) -> u64 {
        HEADER_SIZE as u64 + rank * Checkpoint::<L>::record_size() as u64
    }

    /// Write `checkpoint` at position `len()`
    pub fn append(&mut self, checkpoint: &Checkpoint<L>) -> IndexResult<()> {
        let position = self.header.size;
        let mut record = vec![0u8; Checkpoint::<L>::record_size()];
        checkpoint.encode(&mut record);

        let io = self.io_mut()?;
        io.file.seek(SeekFrom::Start(Self::offset_of(position)))?;
        io.file.write_all(&record)?;

        self.header.size += 1;
        Ok(())
    }

    /// Record at `rank`
    pub fn get(&self, rank: u64) -> IndexResult<Checkpoint<L>> {
        if rank >= self.header.size {
            return Err(IndexError::OutOfRange {
                rank,
                size: self.header.size,
            });
        }

        let mut io = self.io()?;
        if let Some(checkpoint) = io.cache.get(rank) {
            return Ok(checkpoint);
        }

        let mut record = vec![0u8; Checkpoint::<L>::record_size()];
        io.file.seek(SeekFrom::Start(Self::offset_of(rank)))?;
        io.file.read_exact(&mut record)?;
        let checkpoint = Checkpoint::decode(&record);

        io.cache.put(checkpoint.clone());
        Ok(checkpoint)
    }

    /// Binary search over records assumed sorted by timestamp
    pub fn search(&self, timestamp: Timestamp) -> IndexResult<Result<u64, u64>> {
        search_sorted(self.header.size, timestamp, |rank| {
            Ok(self.get(rank)?.timestamp)
        })
    }

    pub fn len(&self) -> u64 {
        self.header.size
    }

    pub fn is_empty(&self) -> bool {
        self.header.size == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn is_created_from_scratch(&self) -> bool {
        self.created_from_scratch
    }

    pub fn is_complete(&self) -> bool {
        self.header.complete
    }

    pub fn time_range(&self) -> TimeRange {
        self.header.time_range
    }

    pub fn set_time_range(&mut self, range: TimeRange) {
        self.header.time_range = range;
    }

    pub fn nb_events(&self) -> u64 {
        self.header.nb_events
    }

    pub fn set_nb_events(&mut self, nb_events: u64) {
        self.header.nb_events = nb_events;
    }

    /// Rewrite the header and fsync
    fn persist_header(&mut self) -> IndexResult<()> {
        let header = self.header.clone();
        let io = self.io_mut()?;
        header.write_to(&mut io.file)?;
        io.file.sync_all()?;
        Ok(())
    }

    /// Flag the file as complete so the next session can reuse it
    pub fn set_complete(&mut self) -> IndexResult<()> {
        if self.header.complete {
            return Ok(());
        }
        self.header.complete = true;
        self.persist_header()?;
        tracing::debug!(
            "Flat array {:?} complete with {} records",
            self.path,
            self.header.size
        );
        Ok(())
    }

    /// Persist the header and close the file
    pub fn dispose(&mut self) -> IndexResult<()> {
        if self.io.is_none() {
            return Ok(());
        }
        let result = self.persist_header();
        self.io = None;
        result
    }
}

impl<L: Location> Drop for FlatArray<L> {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            tracing::warn!("Failed to close flat array {:?}: {}", self.path, e);
        }
    }
}

/// Checkpoint index backed by a single [`FlatArray`]
pub struct FlatArrayCheckpointIndex<L: Location> {
    array: FlatArray<L>,
    last_timestamp: Option<Timestamp>,
    warned_unordered: bool,
}

impl<L: Location> FlatArrayCheckpointIndex<L> {
    pub fn open(
        path: impl AsRef<Path>,
        signature: TraceSignature,
        options: &IndexOptions,
    ) -> IndexResult<Self> {
        let array = FlatArray::open(path, signature, options.record_cache_size)?;
        Ok(Self {
            array,
            last_timestamp: None,
            warned_unordered: false,
        })
    }

    pub fn path(&self) -> &Path {
        self.array.path()
    }
}

impl<L: Location> CheckpointIndex<L> for FlatArrayCheckpointIndex<L> {
    fn backend(&self) -> IndexBackend {
        IndexBackend::FlatArray
    }

    fn insert(&mut self, mut checkpoint: Checkpoint<L>) -> IndexResult<u64> {
        let rank = self.array.len();
        checkpoint.rank = rank;

        if let Some(last) = self.last_timestamp {
            if checkpoint.timestamp < last && !self.warned_unordered {
                tracing::warn!(
                    "Checkpoint {} goes back in time ({} < {}); flat array searches will be unreliable",
                    rank,
                    checkpoint.timestamp,
                    last
                );
                self.warned_unordered = true;
            }
        }
        self.last_timestamp = Some(checkpoint.timestamp);

        self.array.append(&checkpoint)?;
        Ok(rank)
    }

    fn get(&self, rank: u64) -> IndexResult<Checkpoint<L>> {
        self.array.get(rank)
    }

    fn find(&self, timestamp: Timestamp) -> IndexResult<Result<u64, u64>> {
        self.array.search(timestamp)
    }

    fn size(&self) -> u64 {
        self.array.len()
    }

    fn time_range(&self) -> TimeRange {
        self.array.time_range()
    }

    fn set_time_range(&mut self, range: TimeRange) {
        self.array.set_time_range(range);
    }

    fn nb_events(&self) -> u64 {
        self.array.nb_events()
    }

    fn set_nb_events(&mut self, nb_events: u64) {
        self.array.set_nb_events(nb_events);
    }

    fn is_created_from_scratch(&self) -> bool {
        self.array.is_created_from_scratch()
    }

    fn is_complete(&self) -> bool {
        self.array.is_complete()
    }

    fn set_index_complete(&mut self) -> IndexResult<()> {
        self.array.set_complete()
    }

    fn dispose(&mut self) -> IndexResult<()> {
        self.array.dispose()
    }
}
