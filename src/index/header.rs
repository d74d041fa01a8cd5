//! Index file header
//!
//! Every file-backed index starts with the same 64-byte header:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (64 bytes)                       │
//! │   magic: [u8; 4]   "TSFA" | "TSBT"      │
//! │   version: u16                          │
//! │   complete: u8                          │
//! │   reserved: u8                          │
//! │   location_size: u32                    │
//! │   size: u64        (checkpoint count)   │
//! │   nb_events: u64                        │
//! │   time_start: i64                       │
//! │   time_end: i64                         │
//! │   trace_size: u64  (signature)          │
//! │   trace_mtime: i64 (signature)          │
//! │   checksum: u32    (CRC32 of 0..60)     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! A file is reused only when its header is intact, marked complete and
//! carries the signature of the trace being opened. Anything else deletes the
//! file and starts a fresh one.

use crate::index::error::{IndexError, IndexResult};
use crate::types::{TimeRange, TraceSignature};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Header size in bytes
pub const HEADER_SIZE: usize = 64;

/// Current index format version
pub const INDEX_VERSION: u16 = 1;

/// Magic of flat-array record files
pub const FLAT_ARRAY_MAGIC: [u8; 4] = *b"TSFA";

/// Magic of B-tree node files
pub const BTREE_MAGIC: [u8; 4] = *b"TSBT";

/// Decoded index file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub complete: bool,
    pub location_size: u32,
    pub size: u64,
    pub nb_events: u64,
    pub time_range: TimeRange,
    pub signature: TraceSignature,
}

impl IndexHeader {
    /// Header of an empty, incomplete index
    pub fn new(magic: [u8; 4], location_size: usize, signature: TraceSignature) -> Self {
        Self {
            magic,
            version: INDEX_VERSION,
            complete: false,
            location_size: location_size as u32,
            size: 0,
            nb_events: 0,
            time_range: TimeRange::NULL,
            signature,
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0..4].copy_from_slice(&self.magic);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6] = self.complete as u8;
        buf[8..12].copy_from_slice(&self.location_size.to_le_bytes());
        buf[12..20].copy_from_slice(&self.size.to_le_bytes());
        buf[20..28].copy_from_slice(&self.nb_events.to_le_bytes());
        buf[28..36].copy_from_slice(&self.time_range.start.to_le_bytes());
        buf[36..44].copy_from_slice(&self.time_range.end.to_le_bytes());
        buf[44..52].copy_from_slice(&self.signature.byte_size.to_le_bytes());
        buf[52..60].copy_from_slice(&self.signature.modified.to_le_bytes());

        let checksum = crc32fast::hash(&buf[0..60]);
        buf[60..64].copy_from_slice(&checksum.to_le_bytes());

        buf
    }

    /// Parse header from bytes
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> IndexResult<Self> {
        let stored_checksum = read_u32(buf, 60);
        let computed_checksum = crc32fast::hash(&buf[0..60]);
        if stored_checksum != computed_checksum {
            return Err(IndexError::Corruption(format!(
                "Header checksum mismatch: stored={}, computed={}",
                stored_checksum, computed_checksum
            )));
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != INDEX_VERSION {
            return Err(IndexError::InvalidFormat(format!(
                "Unsupported version: {}",
                version
            )));
        }

        Ok(Self {
            magic,
            version,
            complete: buf[6] != 0,
            location_size: read_u32(buf, 8),
            size: read_u64(buf, 12),
            nb_events: read_u64(buf, 20),
            time_range: TimeRange {
                start: read_i64(buf, 28),
                end: read_i64(buf, 36),
            },
            signature: TraceSignature {
                byte_size: read_u64(buf, 44),
                modified: read_i64(buf, 52),
            },
        })
    }

    /// Read the header at the start of `file`
    pub fn read_from(file: &mut File) -> IndexResult<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)?;
        Self::from_bytes(&buf)
    }

    /// Overwrite the header at the start of `file`
    pub fn write_to(&self, file: &mut File) -> IndexResult<()> {
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Why this header cannot back an index for `signature`, if it can't
    fn rejection(
        &self,
        magic: [u8; 4],
        location_size: usize,
        signature: &TraceSignature,
    ) -> Option<String> {
        if self.magic != magic {
            Some(format!("unexpected magic {:?}", self.magic))
        } else if self.location_size as usize != location_size {
            Some(format!(
                "location size {} does not match {}",
                self.location_size, location_size
            ))
        } else if !self.complete {
            Some("index was never completed".to_string())
        } else if self.signature != *signature {
            Some("trace changed since the index was built".to_string())
        } else {
            None
        }
    }
}

/// Read the header of an index file without opening it for writing
pub fn read_header(path: impl AsRef<Path>) -> IndexResult<IndexHeader> {
    let mut file = File::open(path)?;
    IndexHeader::read_from(&mut file)
}

/// An index file opened for reading and writing
pub struct OpenedFile {
    pub file: File,
    pub header: IndexHeader,
    /// True when no reusable file existed and a fresh one was created
    pub created_from_scratch: bool,
}

/// Open a reusable index file, or replace it with a fresh one.
///
/// Unreadable, stale or incomplete files are truncated; that decision is
/// logged rather than returned as an error.
pub fn open_or_create(
    path: &Path,
    magic: [u8; 4],
    location_size: usize,
    signature: TraceSignature,
) -> IndexResult<OpenedFile> {
    if path.exists() {
        match try_reuse(path, magic, location_size, &signature) {
            Ok(Some(opened)) => {
                tracing::info!(
                    "Reusing index {:?} ({} checkpoints)",
                    path,
                    opened.header.size
                );
                return Ok(opened);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Index {:?} is unreadable, rebuilding: {}", path, e);
            }
        }
    }

    create(path, magic, location_size, signature)
}

fn try_reuse(
    path: &Path,
    magic: [u8; 4],
    location_size: usize,
    signature: &TraceSignature,
) -> IndexResult<Option<OpenedFile>> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let header = IndexHeader::read_from(&mut file)?;

    if let Some(reason) = header.rejection(magic, location_size, signature) {
        tracing::info!("Discarding index {:?}: {}", path, reason);
        return Ok(None);
    }

    Ok(Some(OpenedFile {
        file,
        header,
        created_from_scratch: false,
    }))
}

/// Create `path`, truncating any existing file, with an empty header
pub fn create(
    path: &Path,
    magic: [u8; 4],
    location_size: usize,
    signature: TraceSignature,
) -> IndexResult<OpenedFile> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    let header = IndexHeader::new(magic, location_size, signature);
    header.write_to(&mut file)?;
    file.flush()?;

    tracing::debug!("Created index file {:?}", path);

    Ok(OpenedFile {
        file,
        header,
        created_from_scratch: true,
    })
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

pub(crate) fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

pub(crate) fn read_i64(buf: &[u8], at: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    i64::from_le_bytes(bytes)
}
