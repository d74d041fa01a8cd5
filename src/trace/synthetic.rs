//! Deterministic in-memory trace
//!
//! Event `i` has timestamp `start + i * step`, optionally shifted by a
//! pseudo-random jitter so that timestamps stop being monotonic. The
//! location of an event is its index.

use crate::trace::error::TraceResult;
use crate::trace::{TraceEvent, TraceSource};
use crate::types::{Timestamp, TraceSignature};

#[derive(Debug, Clone)]
pub struct SyntheticTrace {
    name: String,
    timestamps: Vec<Timestamp>,
    signature: TraceSignature,
    reads: u64,
}

impl SyntheticTrace {
    pub fn new(name: impl Into<String>, nb_events: u64, start: Timestamp, step: i64) -> Self {
        // Timestamps clamp at the i64 bounds instead of wrapping
        let timestamps = (0..nb_events)
            .map(|i| {
                let offset = i128::from(i) * i128::from(step);
                clamp_timestamp(i128::from(start) + offset)
            })
            .collect();
        Self {
            name: name.into(),
            timestamps,
            signature: TraceSignature::new(
                nb_events.saturating_mul(16),
                start ^ step.rotate_left(32),
            ),
            reads: 0,
        }
    }

    /// Shift every timestamp by a value in `[-amplitude, amplitude]` drawn
    /// from a xorshift sequence seeded with `seed`
    pub fn with_jitter(mut self, seed: u64, amplitude: i64) -> Self {
        let mut state = seed.max(1);
        let amplitude = amplitude.unsigned_abs();
        let span = amplitude.saturating_mul(2).saturating_add(1);
        for ts in &mut self.timestamps {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let shift = i128::from(state % span) - i128::from(amplitude);
            *ts = clamp_timestamp(i128::from(*ts) + shift);
        }
        self.signature.modified ^= seed as i64;
        self
    }

    /// Build from explicit timestamps
    pub fn from_timestamps(name: impl Into<String>, timestamps: Vec<Timestamp>) -> Self {
        let signature = TraceSignature::new(
            timestamps.len() as u64 * 16,
            timestamps.iter().fold(0i64, |acc, ts| acc.rotate_left(5) ^ ts),
        );
        Self {
            name: name.into(),
            timestamps,
            signature,
            reads: 0,
        }
    }

    pub fn len(&self) -> u64 {
        self.timestamps.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    /// Number of `read_next` calls so far
    pub fn reads(&self) -> u64 {
        self.reads
    }
}

fn clamp_timestamp(value: i128) -> Timestamp {
    value.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as Timestamp
}

impl TraceSource<u64> for SyntheticTrace {
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> TraceSignature {
        self.signature
    }

    fn initial_location(&self) -> u64 {
        0
    }

    fn read_next(&mut self, location: &u64) -> TraceResult<Option<TraceEvent<u64>>> {
        self.reads += 1;
        let Some(&timestamp) = usize::try_from(*location)
            .ok()
            .and_then(|i| self.timestamps.get(i))
        else {
            return Ok(None);
        };

        Ok(Some(TraceEvent {
            timestamp,
            payload: *location,
            location: *location,
            next_location: location + 1,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events() {
        let mut trace = SyntheticTrace::new("t", 3, 100, 5);
        assert_eq!(trace.timestamps(), &[100, 105, 110]);

        let event = trace.read_next(&1).unwrap().unwrap();
        assert_eq!(event.timestamp, 105);
        assert_eq!(event.next_location, 2);
        assert!(trace.read_next(&3).unwrap().is_none());
        assert_eq!(trace.reads(), 2);
    }

    #[test]
    fn test_jitter_is_deterministic_and_bounded() {
        let a = SyntheticTrace::new("t", 1_000, 0, 10).with_jitter(42, 25);
        let b = SyntheticTrace::new("t", 1_000, 0, 10).with_jitter(42, 25);
        assert_eq!(a.timestamps(), b.timestamps());
        assert_ne!(a.signature(), SyntheticTrace::new("t", 1_000, 0, 10).signature());

        for (i, ts) in a.timestamps().iter().enumerate() {
            assert!((ts - i as i64 * 10).abs() <= 25);
        }
        assert!(a.timestamps().windows(2).any(|w| w[1] < w[0]));
    }

    #[test]
    fn test_extreme_step_and_jitter_saturate() {
        let trace = SyntheticTrace::new("t", 3, i64::MAX - 1, i64::MAX);
        assert_eq!(trace.timestamps(), &[i64::MAX - 1, i64::MAX, i64::MAX]);

        let trace = SyntheticTrace::new("t", 2, 0, i64::MIN).with_jitter(7, i64::MAX);
        assert_eq!(trace.len(), 2);
        assert!(trace.timestamps()[1] < 0);
    }
}
