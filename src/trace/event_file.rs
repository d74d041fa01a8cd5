//! Binary event file trace
//!
//! Layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (16 bytes)                       │
//! │   magic: [u8; 4]   "TSEV"               │
//! │   version: u32                          │
//! │   event_count: u64                      │
//! ├─────────────────────────────────────────┤
//! │ EVENTS (16 bytes each)                  │
//! │   timestamp: i64                        │
//! │   payload: u64                          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Locations are byte offsets into the file.

use crate::trace::error::{TraceError, TraceResult};
use crate::trace::{TraceEvent, TraceSource};
use crate::types::{Timestamp, TraceSignature};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const EVENT_MAGIC: [u8; 4] = *b"TSEV";
const EVENT_VERSION: u32 = 1;
const FILE_HEADER_SIZE: u64 = 16;
const EVENT_SIZE: u64 = 16;

/// Trace stored as fixed-size event records
pub struct EventFileTrace {
    path: PathBuf,
    name: String,
    signature: TraceSignature,
    event_count: u64,
    end_offset: u64,
    reader: BufReader<File>,
    position: u64,
}

impl EventFileTrace {
    /// Write `events` (timestamp, payload) to a new event file at `path`.
    /// Returns the number of events written.
    pub fn write(
        path: impl AsRef<Path>,
        events: impl IntoIterator<Item = (Timestamp, u64)>,
    ) -> TraceResult<u64> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = File::create(path)?;
        file.write_all(&[0u8; FILE_HEADER_SIZE as usize])?;

        let mut writer = BufWriter::new(file);
        let mut count = 0u64;
        for (timestamp, payload) in events {
            writer.write_all(&timestamp.to_le_bytes())?;
            writer.write_all(&payload.to_le_bytes())?;
            count += 1;
        }

        let mut file = writer.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&EVENT_MAGIC)?;
        file.write_all(&EVENT_VERSION.to_le_bytes())?;
        file.write_all(&count.to_le_bytes())?;
        file.sync_all()?;

        tracing::debug!("Wrote {} events to {:?}", count, path);
        Ok(count)
    }

    /// Open an event file for reading
    pub fn open(path: impl AsRef<Path>) -> TraceResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;

        let mut header = [0u8; FILE_HEADER_SIZE as usize];
        file.read_exact(&mut header).map_err(|_| {
            TraceError::InvalidFormat(format!("{:?} is too short for an event file", path))
        })?;
        if header[0..4] != EVENT_MAGIC {
            return Err(TraceError::InvalidFormat(format!(
                "{:?} is not an event file",
                path
            )));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != EVENT_VERSION {
            return Err(TraceError::InvalidFormat(format!(
                "Unsupported event file version: {}",
                version
            )));
        }
        let mut count = [0u8; 8];
        count.copy_from_slice(&header[8..16]);
        let event_count = u64::from_le_bytes(count);

        let actual = file.metadata()?.len();
        let expected = event_count
            .checked_mul(EVENT_SIZE)
            .and_then(|size| size.checked_add(FILE_HEADER_SIZE))
            .ok_or_else(|| {
                TraceError::InvalidFormat(format!(
                    "{:?} declares an impossible event count {}",
                    path, event_count
                ))
            })?;
        if actual < expected {
            return Err(TraceError::InvalidFormat(format!(
                "{:?} truncated: {} bytes, expected {}",
                path, actual, expected
            )));
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "trace".to_string());
        let signature = TraceSignature::from_path(&path)?;

        Ok(Self {
            path,
            name,
            signature,
            event_count,
            end_offset: expected,
            reader: BufReader::new(file),
            position: FILE_HEADER_SIZE,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }
}

impl TraceSource<u64> for EventFileTrace {
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> TraceSignature {
        self.signature
    }

    fn initial_location(&self) -> u64 {
        FILE_HEADER_SIZE
    }

    fn read_next(&mut self, location: &u64) -> TraceResult<Option<TraceEvent<u64>>> {
        let offset = *location;
        if offset < FILE_HEADER_SIZE || (offset - FILE_HEADER_SIZE) % EVENT_SIZE != 0 {
            return Err(TraceError::InvalidFormat(format!(
                "Offset {} is not an event boundary",
                offset
            )));
        }
        match offset.checked_add(EVENT_SIZE) {
            Some(next) if next <= self.end_offset => {}
            _ => return Ok(None),
        }

        if offset != self.position {
            self.reader.seek(SeekFrom::Start(offset))?;
        }
        let mut record = [0u8; EVENT_SIZE as usize];
        self.reader.read_exact(&mut record)?;
        self.position = offset + EVENT_SIZE;

        let mut timestamp = [0u8; 8];
        let mut payload = [0u8; 8];
        timestamp.copy_from_slice(&record[0..8]);
        payload.copy_from_slice(&record[8..16]);

        Ok(Some(TraceEvent {
            timestamp: i64::from_le_bytes(timestamp),
            payload: u64::from_le_bytes(payload),
            location: offset,
            next_location: self.position,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kernel.evt");

        let events = (0..100).map(|i| (i * 7, i as u64 * 2));
        let written = EventFileTrace::write(&path, events).unwrap();
        assert_eq!(written, 100);

        let mut trace = EventFileTrace::open(&path).unwrap();
        assert_eq!(trace.name(), "kernel");
        assert_eq!(trace.event_count(), 100);

        let mut location = trace.initial_location();
        let mut seen = 0;
        while let Some(event) = trace.read_next(&location).unwrap() {
            assert_eq!(event.timestamp, seen * 7);
            assert_eq!(event.payload, seen as u64 * 2);
            location = event.next_location;
            seen += 1;
        }
        assert_eq!(seen, 100);

        // Random access
        let event = trace.read_next(&(16 + 42 * 16)).unwrap().unwrap();
        assert_eq!(event.timestamp, 42 * 7);
    }

    #[test]
    fn test_rejects_misaligned_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.evt");
        EventFileTrace::write(&path, [(1, 1), (2, 2)]).unwrap();

        let mut trace = EventFileTrace::open(&path).unwrap();
        assert!(matches!(
            trace.read_next(&17),
            Err(TraceError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_rejects_overflowing_event_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("forged.evt");

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&EVENT_MAGIC);
        bytes.extend_from_slice(&EVENT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(u64::MAX / 8).to_le_bytes());
        bytes.extend_from_slice(&[0u8; 32]);
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            EventFileTrace::open(&path),
            Err(TraceError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_read_past_end_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.evt");
        EventFileTrace::write(&path, [(1, 1)]).unwrap();

        let mut trace = EventFileTrace::open(&path).unwrap();
        assert!(trace.read_next(&32).unwrap().is_none());
        let last_boundary = u64::MAX - (u64::MAX - FILE_HEADER_SIZE) % EVENT_SIZE;
        assert!(trace.read_next(&last_boundary).unwrap().is_none());
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.evt");
        std::fs::write(&path, b"definitely not events").unwrap();
        assert!(matches!(
            EventFileTrace::open(&path),
            Err(TraceError::InvalidFormat(_))
        ));
    }
}
