//! Timeline timestamps
//!
//! Timeline positions are unsigned nanosecond counts, the same resolution the
//! combining stage reports. Arithmetic saturates instead of wrapping: a
//! nanosecond `u64` covers roughly 584 years, so saturation is only reachable
//! by a misbehaving backend, never by an honest pause.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const NANOS_PER_MILLI: u64 = 1_000_000;
const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Position on a playback timeline, in nanoseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    pub const fn from_nanos(nanos: u64) -> Self {
        Timestamp(nanos)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Timestamp(millis.saturating_mul(NANOS_PER_MILLI))
    }

    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs.saturating_mul(NANOS_PER_SECOND))
    }

    /// Timeline position reached after `frames` frames at `sample_rate` Hz
    pub fn from_frames(frames: u64, sample_rate: u32) -> Self {
        if sample_rate == 0 {
            return Timestamp::ZERO;
        }
        let nanos = frames as u128 * NANOS_PER_SECOND as u128 / sample_rate as u128;
        Timestamp(nanos.min(u64::MAX as u128) as u64)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub const fn as_millis(self) -> u64 {
        self.0 / NANOS_PER_MILLI
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_nanos(self.0)
    }

    /// Elapsed time from `earlier` to `self`, or `None` if the timeline went backwards
    pub fn checked_since(self, earlier: Timestamp) -> Option<Timestamp> {
        self.0.checked_sub(earlier.0).map(Timestamp)
    }

    pub fn saturating_sub(self, other: Timestamp) -> Timestamp {
        Timestamp(self.0.saturating_sub(other.0))
    }

    pub fn saturating_add(self, other: Timestamp) -> Timestamp {
        Timestamp(self.0.saturating_add(other.0))
    }

    pub fn checked_add(self, other: Timestamp) -> Option<Timestamp> {
        self.0.checked_add(other.0).map(Timestamp)
    }
}

impl From<Duration> for Timestamp {
    fn from(duration: Duration) -> Self {
        Timestamp(duration.as_nanos().min(u64::MAX as u128) as u64)
    }
}

impl fmt::Display for Timestamp {
    /// Formats as `H:MM:SS.mmm`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_millis = self.as_millis();
        let millis = total_millis % 1000;
        let total_secs = total_millis / 1000;
        let secs = total_secs % 60;
        let mins = (total_secs / 60) % 60;
        let hours = total_secs / 3600;
        write!(f, "{}:{:02}:{:02}.{:03}", hours, mins, secs, millis)
    }
}
