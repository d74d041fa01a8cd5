//! CTF stream packet index
//!
//! A CTF stream file is a sequence of packets, each covering a span of
//! timestamps. The packet index lets a reader jump to the packet that can
//! hold a given timestamp instead of walking the file from the start.
//!
//! ```rust
//! use tracestate::ctf::{PacketIndexBuilder, PacketIndexEntry};
//!
//! let mut builder = PacketIndexBuilder::new();
//! builder.add_entry(PacketIndexEntry::new(0, 0, 10)).unwrap();
//! builder.add_entry(PacketIndexEntry::new(4096, 10, 20)).unwrap();
//! builder.add_entry(PacketIndexEntry::new(8192, 21, 30)).unwrap();
//! let index = builder.finish();
//!
//! let mut cursor = index.search(15).unwrap();
//! assert_eq!(cursor.position(), 1);
//! assert_eq!(cursor.next().unwrap().offset_bytes, 4096);
//! ```

pub mod error;
pub mod packet;
pub mod packet_index;

pub use error::{PacketIndexError, PacketIndexResult};
pub use packet::PacketIndexEntry;
pub use packet_index::{PacketCursor, PacketIndexBuilder, StreamPacketIndex};
