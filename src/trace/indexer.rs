//! Checkpoint indexer
//!
//! Builds a checkpoint index during one forward scan of a trace and resolves
//! seek-by-time / seek-by-rank requests against it.
//!
//! Checkpoint `k` is taken just before event `k * interval`, so the context
//! rank of a checkpoint is always `k * interval`.

use crate::config::IndexerConfig;
use crate::index::{
    open_index, Checkpoint, CheckpointIndex, IndexStats, IndexWriter, Location,
    SharedCheckpointIndex,
};
use crate::trace::error::{TraceError, TraceResult};
use crate::trace::{TraceContext, TraceEvent, TraceSource};
use crate::types::{TimeRange, Timestamp};

/// Events between progress logs during a scan
const PROGRESS_EVERY: u64 = 100_000;

/// Drives a checkpoint index for one trace
pub struct CheckpointIndexer<L: Location> {
    index: SharedCheckpointIndex<L>,
    interval: u64,
    initial_location: L,
}

impl<L: Location> CheckpointIndexer<L> {
    /// Wrap an opened index. `interval` is the number of events between
    /// checkpoints.
    pub fn new(
        index: Box<dyn CheckpointIndex<L>>,
        interval: u64,
        initial_location: L,
    ) -> TraceResult<Self> {
        if interval == 0 {
            return Err(TraceError::Config(
                "checkpoint interval must be greater than 0".into(),
            ));
        }
        Ok(Self {
            index: SharedCheckpointIndex::new(index),
            interval,
            initial_location,
        })
    }

    /// Open the configured backend in the trace's supplementary directory
    pub fn open<T>(trace: &T, config: &IndexerConfig) -> TraceResult<Self>
    where
        T: TraceSource<L> + ?Sized,
    {
        config.validate()?;
        let dir = config.trace_dir(trace.name());
        let index = open_index(
            config.backend,
            &dir,
            trace.signature(),
            &config.index_options(),
        )?;
        Self::new(index, config.checkpoint_interval, trace.initial_location())
    }

    /// Scan `trace` and populate the index, unless a complete index was
    /// reused, in which case the trace is not read at all
    pub fn build_index<T>(&mut self, trace: &mut T) -> TraceResult<IndexStats>
    where
        T: TraceSource<L> + ?Sized,
    {
        if !self.index.is_created_from_scratch()? && self.index.is_complete()? {
            let stats = self.index.stats()?;
            tracing::info!("Index for {} reused: {}", trace.name(), stats);
            return Ok(stats);
        }

        tracing::info!(
            "Indexing {} (one checkpoint every {} events)",
            trace.name(),
            self.interval
        );
        let mut writer = self.index.writer()?;
        let (nb_events, range) = self.scan(trace, &mut writer)?;

        writer.set_time_range(range)?;
        writer.set_nb_events(nb_events)?;
        writer.set_index_complete()?;
        drop(writer);

        let stats = self.index.stats()?;
        tracing::info!("Indexed {}: {}", trace.name(), stats);
        Ok(stats)
    }

    fn scan<T>(&self, trace: &mut T, writer: &mut IndexWriter<L>) -> TraceResult<(u64, TimeRange)>
    where
        T: TraceSource<L> + ?Sized,
    {
        let mut location = trace.initial_location();
        let mut rank = 0u64;
        let mut range = TimeRange::NULL;

        while let Some(event) = trace.read_next(&location)? {
            if rank % self.interval == 0 {
                writer.insert(Checkpoint::new(event.timestamp, location.clone()))?;
            }
            range.expand_to(event.timestamp);
            rank += 1;
            if rank % PROGRESS_EVERY == 0 {
                tracing::debug!("{}: {} events scanned", trace.name(), rank);
            }
            location = event.next_location;
        }

        Ok((rank, range))
    }

    /// Context of the nearest checkpoint from which an event at `timestamp`
    /// can be reached by parsing forward.
    ///
    /// On an exact match the previous checkpoint is used, since events with
    /// the same timestamp may precede the matching checkpoint.
    pub fn seek_by_time(&self, timestamp: Timestamp) -> TraceResult<TraceContext<L>> {
        if self.index.confirmed_size() == 0 {
            return Ok(TraceContext::new(self.initial_location.clone(), 0));
        }
        let checkpoint_rank = match self.index.find(timestamp)? {
            Ok(rank) => rank.saturating_sub(1),
            Err(insertion_point) => insertion_point.saturating_sub(1),
        };
        self.context_at(checkpoint_rank)
    }

    /// Context of the checkpoint at or before the event of rank `rank`
    pub fn seek_by_rank(&self, rank: u64) -> TraceResult<TraceContext<L>> {
        let size = self.index.confirmed_size();
        if size == 0 {
            return Ok(TraceContext::new(self.initial_location.clone(), 0));
        }
        self.context_at((rank / self.interval).min(size - 1))
    }

    fn context_at(&self, checkpoint_rank: u64) -> TraceResult<TraceContext<L>> {
        let checkpoint = self.index.get(checkpoint_rank)?;
        Ok(TraceContext::new(
            checkpoint.location,
            checkpoint_rank * self.interval,
        ))
    }

    /// First event at or after `timestamp`, found by parsing forward from
    /// the nearest checkpoint
    pub fn locate_event_by_time<T>(
        &self,
        trace: &mut T,
        timestamp: Timestamp,
    ) -> TraceResult<Option<(TraceContext<L>, TraceEvent<L>)>>
    where
        T: TraceSource<L> + ?Sized,
    {
        let mut context = self.seek_by_time(timestamp)?;
        while let Some(event) = trace.read_next(&context.location)? {
            if event.timestamp >= timestamp {
                return Ok(Some((context, event)));
            }
            context = TraceContext::new(event.next_location, context.rank + 1);
        }
        Ok(None)
    }

    /// Event of rank `rank`, `None` past the end of the trace
    pub fn locate_event_by_rank<T>(
        &self,
        trace: &mut T,
        rank: u64,
    ) -> TraceResult<Option<(TraceContext<L>, TraceEvent<L>)>>
    where
        T: TraceSource<L> + ?Sized,
    {
        let mut context = self.seek_by_rank(rank)?;
        while let Some(event) = trace.read_next(&context.location)? {
            if context.rank == rank {
                return Ok(Some((context, event)));
            }
            context = TraceContext::new(event.next_location, context.rank + 1);
        }
        Ok(None)
    }

    /// Reader handle onto the index, usable from other threads while the
    /// index is being built
    pub fn index(&self) -> &SharedCheckpointIndex<L> {
        &self.index
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn stats(&self) -> TraceResult<IndexStats> {
        Ok(self.index.stats()?)
    }

    /// Release the index files
    pub fn dispose(&self) -> TraceResult<()> {
        Ok(self.index.dispose()?)
    }
}
