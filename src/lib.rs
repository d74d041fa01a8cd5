//! # tracestate
//!
//! Trace state-history indexing - checkpoint indexes that let a trace reader
//! jump to any timestamp or event rank of a large trace, and the interval
//! model used to answer "what was the value of attribute X at time T".
//!
//! ## Features
//!
//! - **Three checkpoint index backends**: in-memory, flat on-disk array,
//!   on-disk B-tree for traces with non-monotonic timestamps
//! - **Reuse across sessions**: completed indexes are persisted next to the
//!   trace and discarded automatically when the trace changes
//! - **CTF packet index**: nearest-packet search over packet time spans
//! - **State intervals**: typed state values, interval collections and an
//!   in-memory state history with point, full and range queries
//!
//! ## Modules
//!
//! - [`index`]: Checkpoint index contract and backends
//! - [`ctf`]: Stream packet index
//! - [`state`]: State values, intervals and history
//! - [`trace`]: Trace sources and the checkpoint indexer
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tracestate::config::Config;
//! use tracestate::trace::{CheckpointIndexer, EventFileTrace};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let mut trace = EventFileTrace::open("kernel.evt")?;
//!
//!     // Reuses a complete index from a previous session when possible
//!     let mut indexer = CheckpointIndexer::open(&trace, &config.indexer)?;
//!     let stats = indexer.build_index(&mut trace)?;
//!     println!("{}", stats);
//!
//!     if let Some((context, event)) = indexer.locate_event_by_time(&mut trace, 1_000_000)? {
//!         println!("event {} at {}", context.rank, event.timestamp);
//!     }
//!
//!     indexer.dispose()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod ctf;
pub mod index;
pub mod state;
pub mod trace;
pub mod types;

// Re-export top-level types for convenience
pub use types::{TimeRange, Timestamp, TraceSignature};

pub use index::{
    open_index, BTreeCheckpointIndex, Checkpoint, CheckpointIndex, CtfLocation,
    FlatArrayCheckpointIndex, IndexBackend, IndexError, IndexOptions, IndexResult, IndexStats,
    Location, MemoryCheckpointIndex, SharedCheckpointIndex,
};

pub use ctf::{
    PacketCursor, PacketIndexBuilder, PacketIndexEntry, PacketIndexError, StreamPacketIndex,
};

pub use state::{
    IntervalCollection, Quark, StateError, StateHistory, StateInterval, StateResult, StateValue,
    StateValueType,
};

pub use trace::{
    CheckpointIndexer, EventFileTrace, SyntheticTrace, TraceContext, TraceError, TraceEvent,
    TraceResult, TraceSource,
};

pub use config::{Config, ConfigError, IndexerConfig, LoggingConfig};
