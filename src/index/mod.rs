//! Checkpoint Index Structures
//!
//! A checkpoint index maps timestamps and ranks to positions in a trace so a
//! reader can resume parsing near any point without rescanning from the
//! start:
//!
//! - **MemoryCheckpointIndex**: sorted `Vec`, rebuilt every session
//! - **FlatArrayCheckpointIndex**: fixed-size records on disk, O(1) rank
//!   access, binary search by timestamp (requires monotonic timestamps)
//! - **BTreeCheckpointIndex**: on-disk B-tree keyed by timestamp plus a flat
//!   array keyed by rank; correct for non-monotonic timestamps
//!
//! # Architecture
//!
//! ```text
//! Forward scan (single writer)          Random access (many readers)
//!   every N events:                       seek(ts):   find(ts) → rank → get(rank)
//!   insert(Checkpoint{ts, loc})           seek(rank): get(rank / N)
//!        ↓                                     ↓
//!   rank = size, append             location → resume parsing
//! ```

mod btree;
mod btree_index;
mod error;
mod flat_array;
pub mod header;
mod memory;
mod shared;

pub use btree::{BTree, TreeSearch};
pub use btree_index::BTreeCheckpointIndex;
pub use error::{IndexError, IndexResult};
pub use flat_array::{FlatArray, FlatArrayCheckpointIndex};
pub use header::IndexHeader;
pub use memory::MemoryCheckpointIndex;
pub use shared::{IndexWriter, SharedCheckpointIndex};

use crate::types::{TimeRange, Timestamp, TraceSignature};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the flat-array backend
pub const FLAT_ARRAY_FILE: &str = "checkpoint_flatarray.idx";
/// File name of the B-tree half of the B-tree backend
pub const BTREE_FILE: &str = "checkpoint_btree.idx";
/// File name of the rank array half of the B-tree backend
pub const BTREE_RANK_FILE: &str = "checkpoint_btree_flatarray.idx";

/// A position inside a trace that can be stored in fixed-size records
pub trait Location: Clone + std::fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Number of bytes written by [`encode`](Location::encode)
    const ENCODED_SIZE: usize;

    /// Write the location into `buf` (exactly `ENCODED_SIZE` bytes)
    fn encode(&self, buf: &mut [u8]);

    /// Read a location from `buf` (exactly `ENCODED_SIZE` bytes)
    fn decode(buf: &[u8]) -> Self;
}

/// Byte offset (or any 64-bit position)
impl Location for u64 {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        header::read_u64(buf, 0)
    }
}

/// Location identified by the timestamp of the event it points to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimestampLocation(pub Timestamp);

impl Location for TimestampLocation {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.0.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        TimestampLocation(header::read_i64(buf, 0))
    }
}

/// Location inside a CTF stream: a timestamp and the index of the event
/// among those sharing that timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CtfLocation {
    pub timestamp: Timestamp,
    pub index: u64,
}

impl Location for CtfLocation {
    const ENCODED_SIZE: usize = 16;

    fn encode(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[8..16].copy_from_slice(&self.index.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        CtfLocation {
            timestamp: header::read_i64(buf, 0),
            index: header::read_u64(buf, 8),
        }
    }
}

/// Index entry: where the trace was at `timestamp`
///
/// `rank` is assigned by the index on insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint<L> {
    pub timestamp: Timestamp,
    pub location: L,
    pub rank: u64,
}

impl<L: Location> Checkpoint<L> {
    pub fn new(timestamp: Timestamp, location: L) -> Self {
        Self {
            timestamp,
            location,
            rank: 0,
        }
    }

    /// Size of one encoded record: timestamp(8) + rank(8) + location
    pub const fn record_size() -> usize {
        16 + L::ENCODED_SIZE
    }

    /// Encode into `buf` (exactly `record_size()` bytes)
    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[8..16].copy_from_slice(&self.rank.to_le_bytes());
        self.location.encode(&mut buf[16..16 + L::ENCODED_SIZE]);
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            timestamp: header::read_i64(buf, 0),
            rank: header::read_u64(buf, 8),
            location: L::decode(&buf[16..16 + L::ENCODED_SIZE]),
        }
    }

    /// Total order used by the B-tree
    pub(crate) fn key(&self) -> (Timestamp, u64) {
        (self.timestamp, self.rank)
    }
}

/// Encode a search result the legacy way: the rank when found, the bitwise
/// NOT of the insertion point otherwise.
pub fn encode_search_result(result: Result<u64, u64>) -> i64 {
    match result {
        Ok(rank) => rank as i64,
        Err(insertion_point) => !(insertion_point as i64),
    }
}

/// Which structure backs a checkpoint index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    Memory,
    #[serde(alias = "flatarray", alias = "flat-array")]
    FlatArray,
    #[serde(rename = "btree", alias = "b-tree")]
    BTree,
}

impl std::fmt::Display for IndexBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexBackend::Memory => write!(f, "memory"),
            IndexBackend::FlatArray => write!(f, "flat_array"),
            IndexBackend::BTree => write!(f, "btree"),
        }
    }
}

impl std::str::FromStr for IndexBackend {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(IndexBackend::Memory),
            "flat_array" | "flatarray" | "flat-array" => Ok(IndexBackend::FlatArray),
            "btree" | "b-tree" => Ok(IndexBackend::BTree),
            other => Err(IndexError::Config(format!("Unknown index backend: {}", other))),
        }
    }
}

/// Tuning knobs of the file-backed backends
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Minimum degree of the B-tree (nodes hold up to 2t-1 keys)
    pub btree_degree: usize,
    /// B-tree nodes kept in memory
    pub node_cache_size: usize,
    /// Flat-array records kept in memory
    pub record_cache_size: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            btree_degree: 15,
            node_cache_size: 64,
            record_cache_size: 1024,
        }
    }
}

/// Summary of an index, as reported by `stats()`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub backend: IndexBackend,
    pub size: u64,
    pub nb_events: u64,
    pub time_range: TimeRange,
    pub complete: bool,
    pub created_from_scratch: bool,
}

impl std::fmt::Display for IndexStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} index: {} checkpoints, {} events, range {}, complete={}, rebuilt={}",
            self.backend,
            self.size,
            self.nb_events,
            self.time_range,
            self.complete,
            self.created_from_scratch
        )
    }
}

/// Common contract of all checkpoint index backends.
///
/// Writes (`insert`, setters, `set_index_complete`) come from a single
/// producer; reads may run concurrently once wrapped in
/// [`SharedCheckpointIndex`].
pub trait CheckpointIndex<L: Location>: Send + Sync {
    /// Which backend this is
    fn backend(&self) -> IndexBackend;

    /// Append a checkpoint, assigning it `rank = size()`. Returns the rank.
    fn insert(&mut self, checkpoint: Checkpoint<L>) -> IndexResult<u64>;

    /// Checkpoint at `rank`
    fn get(&self, rank: u64) -> IndexResult<Checkpoint<L>>;

    /// Search by timestamp.
    ///
    /// `Ok(rank)` is the lowest-ranked checkpoint with exactly `timestamp`.
    /// `Err(p)` is an insertion point: `p - 1` is the checkpoint immediately
    /// before `timestamp`, `p == 0` means none precedes it.
    fn find(&self, timestamp: Timestamp) -> IndexResult<Result<u64, u64>>;

    /// Search using a probe checkpoint's timestamp
    fn find_checkpoint(&self, checkpoint: &Checkpoint<L>) -> IndexResult<Result<u64, u64>> {
        self.find(checkpoint.timestamp)
    }

    fn size(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn time_range(&self) -> TimeRange;

    fn set_time_range(&mut self, range: TimeRange);

    fn nb_events(&self) -> u64;

    fn set_nb_events(&mut self, nb_events: u64);

    /// True when no reusable persisted index was found and the caller must
    /// scan the trace to populate this one
    fn is_created_from_scratch(&self) -> bool;

    fn is_complete(&self) -> bool;

    /// Mark the index finalized and persist that fact. Idempotent.
    fn set_index_complete(&mut self) -> IndexResult<()>;

    /// Persist metadata and release file handles. Further use fails with
    /// [`IndexError::Closed`]. Idempotent.
    fn dispose(&mut self) -> IndexResult<()>;

    fn stats(&self) -> IndexStats {
        IndexStats {
            backend: self.backend(),
            size: self.size(),
            nb_events: self.nb_events(),
            time_range: self.time_range(),
            complete: self.is_complete(),
            created_from_scratch: self.is_created_from_scratch(),
        }
    }
}

/// Open (or create) a checkpoint index of the requested backend inside the
/// per-trace supplementary directory `dir`
pub fn open_index<L: Location>(
    backend: IndexBackend,
    dir: &Path,
    signature: TraceSignature,
    options: &IndexOptions,
) -> IndexResult<Box<dyn CheckpointIndex<L>>> {
    let index: Box<dyn CheckpointIndex<L>> = match backend {
        IndexBackend::Memory => Box::new(MemoryCheckpointIndex::new()),
        IndexBackend::FlatArray => Box::new(FlatArrayCheckpointIndex::open(
            dir.join(FLAT_ARRAY_FILE),
            signature,
            options,
        )?),
        IndexBackend::BTree => Box::new(BTreeCheckpointIndex::open(dir, signature, options)?),
    };

    tracing::info!(
        "Opened {} checkpoint index in {:?} (from scratch: {})",
        backend,
        dir,
        index.is_created_from_scratch()
    );
    Ok(index)
}

/// Shared helper: lower bound of `timestamp` over `len` records sorted by
/// timestamp, reading them through `timestamp_at`
pub(crate) fn search_sorted<F>(
    len: u64,
    timestamp: Timestamp,
    mut timestamp_at: F,
) -> IndexResult<Result<u64, u64>>
where
    F: FnMut(u64) -> IndexResult<Timestamp>,
{
    let (mut low, mut high) = (0u64, len);
    while low < high {
        let mid = low + (high - low) / 2;
        if timestamp_at(mid)? < timestamp {
            low = mid + 1;
        } else {
            high = mid;
        }
    }

    if low < len && timestamp_at(low)? == timestamp {
        Ok(Ok(low))
    } else {
        Ok(Err(low))
    }
}
