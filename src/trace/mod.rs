//! Trace sources and the checkpoint indexer
//!
//! The indexer scans a [`TraceSource`] once, dropping a checkpoint every N
//! events, and later answers seek requests by resuming the source at the
//! nearest checkpoint.
//!
//! ```rust
//! use tracestate::index::MemoryCheckpointIndex;
//! use tracestate::trace::{CheckpointIndexer, SyntheticTrace};
//!
//! let mut trace = SyntheticTrace::new("demo", 10_000, 0, 10);
//! let index = Box::new(MemoryCheckpointIndex::<u64>::new());
//! let mut indexer = CheckpointIndexer::new(index, 1000, 0u64).unwrap();
//! indexer.build_index(&mut trace).unwrap();
//!
//! let context = indexer.seek_by_rank(4_321).unwrap();
//! assert_eq!(context.rank, 4_000);
//! ```

pub mod error;
pub mod event_file;
pub mod indexer;
pub mod synthetic;

pub use error::{TraceError, TraceResult};
pub use event_file::EventFileTrace;
pub use indexer::CheckpointIndexer;
pub use synthetic::SyntheticTrace;

use crate::index::Location;
use crate::types::{Timestamp, TraceSignature};

/// One parsed event
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvent<L> {
    pub timestamp: Timestamp,
    pub payload: u64,
    /// Where this event starts
    pub location: L,
    /// Where the following event starts
    pub next_location: L,
}

/// Position of the reader: where to resume parsing and the rank of the
/// event found there
#[derive(Debug, Clone, PartialEq)]
pub struct TraceContext<L> {
    pub location: L,
    pub rank: u64,
}

impl<L> TraceContext<L> {
    pub fn new(location: L, rank: u64) -> Self {
        Self { location, rank }
    }
}

/// A trace that can be parsed forward from any stored location
pub trait TraceSource<L: Location> {
    /// Name used for the trace's supplementary directory
    fn name(&self) -> &str;

    /// Identity of the trace content, checked against persisted indexes
    fn signature(&self) -> TraceSignature;

    /// Location of the first event
    fn initial_location(&self) -> L;

    /// Parse the event at `location`, `None` past the last event
    fn read_next(&mut self, location: &L) -> TraceResult<Option<TraceEvent<L>>>;
}
