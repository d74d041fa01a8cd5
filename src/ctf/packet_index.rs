//! Stream packet index
//!
//! Entries are appended by the stream reader through a
//! [`PacketIndexBuilder`], which refuses anything that would break the
//! begin-timestamp order, then frozen into an immutable
//! [`StreamPacketIndex`] for searching.

use crate::ctf::error::{PacketIndexError, PacketIndexResult};
use crate::ctf::packet::PacketIndexEntry;
use crate::types::{TimeRange, Timestamp};

/// Append-only builder of a [`StreamPacketIndex`]
#[derive(Debug, Default)]
pub struct PacketIndexBuilder {
    entries: Vec<PacketIndexEntry>,
}

impl PacketIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append an entry.
    ///
    /// Fails when the entry ends before it begins, or begins before the
    /// previous entry.
    pub fn add_entry(&mut self, entry: PacketIndexEntry) -> PacketIndexResult<()> {
        if entry.timestamp_begin > entry.timestamp_end {
            return Err(PacketIndexError::Reader(format!(
                "Packet begin timestamp {} is after its end timestamp {}",
                entry.timestamp_begin, entry.timestamp_end
            )));
        }
        if let Some(last) = self.entries.last() {
            if entry.timestamp_begin < last.timestamp_begin {
                return Err(PacketIndexError::Reader(format!(
                    "Packet begin timestamp {} is before the previous packet's {}",
                    entry.timestamp_begin, last.timestamp_begin
                )));
            }
        }

        self.entries.push(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Last accepted entry
    pub fn last(&self) -> Option<&PacketIndexEntry> {
        self.entries.last()
    }

    /// Freeze into a searchable index
    pub fn finish(self) -> StreamPacketIndex {
        tracing::debug!("Packet index finished with {} entries", self.entries.len());
        StreamPacketIndex {
            entries: self.entries,
        }
    }
}

/// Immutable, begin-ordered sequence of packet entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamPacketIndex {
    entries: Vec<PacketIndexEntry>,
}

impl StreamPacketIndex {
    /// Build an index from entries, validating them in order
    pub fn from_entries(
        entries: impl IntoIterator<Item = PacketIndexEntry>,
    ) -> PacketIndexResult<Self> {
        let mut builder = PacketIndexBuilder::new();
        for entry in entries {
            builder.add_entry(entry)?;
        }
        Ok(builder.finish())
    }

    /// Cursor at the first packet whose end timestamp is at or after
    /// `timestamp`, the first packet that can contain it. Later packets may
    /// also contain it when packets overlap or have zero length.
    pub fn search(&self, timestamp: Timestamp) -> PacketIndexResult<PacketCursor<'_>> {
        if timestamp < 0 {
            return Err(PacketIndexError::InvalidArgument(format!(
                "Negative timestamp: {}",
                timestamp
            )));
        }

        let position = self
            .entries
            .partition_point(|entry| entry.timestamp_end < timestamp);
        Ok(PacketCursor {
            entries: &self.entries,
            position,
        })
    }

    /// First packet at or after the search position whose range includes
    /// `timestamp`
    pub fn find_containing(
        &self,
        timestamp: Timestamp,
    ) -> PacketIndexResult<Option<&PacketIndexEntry>> {
        let mut cursor = self.search(timestamp)?;
        Ok(cursor
            .by_ref()
            .take_while(|entry| entry.timestamp_begin <= timestamp)
            .find(|entry| entry.includes(timestamp)))
    }

    /// Cursor at the first packet
    pub fn iter(&self) -> PacketCursor<'_> {
        PacketCursor {
            entries: &self.entries,
            position: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PacketIndexEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[PacketIndexEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&PacketIndexEntry> {
        self.entries.last()
    }

    /// Span from the first begin to the greatest end
    pub fn time_range(&self) -> Option<TimeRange> {
        let first = self.entries.first()?;
        let end = self.entries.iter().map(|e| e.timestamp_end).max()?;
        TimeRange::try_new(first.timestamp_begin, end)
    }
}

impl<'a> IntoIterator for &'a StreamPacketIndex {
    type Item = &'a PacketIndexEntry;
    type IntoIter = PacketCursor<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Forward iterator over packet entries that knows its position
#[derive(Debug, Clone)]
pub struct PacketCursor<'a> {
    entries: &'a [PacketIndexEntry],
    position: usize,
}

impl<'a> PacketCursor<'a> {
    /// Index of the entry the next call to `next()` returns
    pub fn position(&self) -> usize {
        self.position
    }

    /// Entry `next()` would return, without advancing
    pub fn peek(&self) -> Option<&'a PacketIndexEntry> {
        self.entries.get(self.position)
    }

    pub fn is_exhausted(&self) -> bool {
        self.position >= self.entries.len()
    }
}

impl<'a> Iterator for PacketCursor<'a> {
    type Item = &'a PacketIndexEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.get(self.position)?;
        self.position += 1;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.entries.len().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PacketCursor<'_> {}
