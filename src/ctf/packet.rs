//! Packet index entries

use crate::types::{TimeRange, Timestamp};
use serde::{Deserialize, Serialize};

/// Location and time span of one packet of a CTF stream file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PacketIndexEntry {
    /// Offset of the packet from the start of the stream file
    pub offset_bytes: u64,
    /// Offset of the packet payload, in bits from the packet start
    pub data_offset_bits: u64,
    /// Total packet size, padding included
    pub packet_size_bits: u64,
    /// Size of the meaningful content
    pub content_size_bits: u64,
    pub timestamp_begin: Timestamp,
    pub timestamp_end: Timestamp,
}

impl PacketIndexEntry {
    /// Entry for a packet at `offset_bytes` spanning `[begin, end]`, with
    /// sizes left at zero
    pub fn new(offset_bytes: u64, timestamp_begin: Timestamp, timestamp_end: Timestamp) -> Self {
        Self {
            offset_bytes,
            data_offset_bits: 0,
            packet_size_bits: 0,
            content_size_bits: 0,
            timestamp_begin,
            timestamp_end,
        }
    }

    pub fn with_sizes(
        mut self,
        data_offset_bits: u64,
        packet_size_bits: u64,
        content_size_bits: u64,
    ) -> Self {
        self.data_offset_bits = data_offset_bits;
        self.packet_size_bits = packet_size_bits;
        self.content_size_bits = content_size_bits;
        self
    }

    /// Closed-interval containment
    pub fn includes(&self, timestamp: Timestamp) -> bool {
        self.timestamp_begin <= timestamp && timestamp <= self.timestamp_end
    }

    /// Packet size rounded up to whole bytes
    pub fn size_bytes(&self) -> u64 {
        self.packet_size_bits.div_ceil(8)
    }

    /// Offset of the first byte after this packet
    pub fn end_offset_bytes(&self) -> u64 {
        self.offset_bytes + self.size_bytes()
    }

    pub fn time_range(&self) -> Option<TimeRange> {
        TimeRange::try_new(self.timestamp_begin, self.timestamp_end)
    }
}

impl std::fmt::Display for PacketIndexEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PacketIndexEntry [offset={}, size={} bits, content={} bits, begin={}, end={}]",
            self.offset_bytes,
            self.packet_size_bits,
            self.content_size_bits,
            self.timestamp_begin,
            self.timestamp_end
        )
    }
}
