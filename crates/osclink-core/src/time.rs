//! NTP timetag handling
//!
//! A timetag is 64-bit fixed point: the high 32 bits count seconds since
//! 1900-01-01, the low 32 bits are a binary fraction of a second. The value
//! `1` (seconds 0, fraction 1) and `0` both mean "immediately"; only `0` is
//! used as the sentinel here.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970)
pub const NTP_EPOCH_OFFSET: u64 = 2_208_988_800;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// 64-bit NTP fixed-point timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeTag(u64);

impl TimeTag {
    /// Deliver on receipt
    pub const IMMEDIATELY: TimeTag = TimeTag(0);

    pub fn new(seconds: u32, fraction: u32) -> Self {
        Self(((seconds as u64) << 32) | fraction as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn seconds(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn fraction(&self) -> u32 {
        self.0 as u32
    }

    pub fn is_immediate(&self) -> bool {
        self.0 == 0
    }

    /// Convert a wall-clock instant. Instants before 1970 clamp to the epoch.
    pub fn from_system_time(time: SystemTime) -> Self {
        let since_unix = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        let seconds = since_unix.as_secs() + NTP_EPOCH_OFFSET;
        let fraction = ((since_unix.subsec_nanos() as u64) << 32) / NANOS_PER_SEC;
        Self::new(seconds as u32, fraction as u32)
    }

    /// Convert to a wall-clock instant. Timetags before 1970 map to the epoch.
    pub fn to_system_time(&self) -> SystemTime {
        let seconds = self.seconds() as u64;
        let Some(unix_seconds) = seconds.checked_sub(NTP_EPOCH_OFFSET) else {
            return UNIX_EPOCH;
        };
        let nanos = (self.fraction() as u64 * NANOS_PER_SEC) >> 32;
        UNIX_EPOCH + Duration::new(unix_seconds, nanos as u32)
    }

    /// Timetag for `delay` from now
    pub fn after(delay: Duration) -> Self {
        Self::from_system_time(SystemTime::now() + delay)
    }

    /// Timetag for `age` ago
    pub fn before(age: Duration) -> Self {
        let time = SystemTime::now().checked_sub(age).unwrap_or(UNIX_EPOCH);
        Self::from_system_time(time)
    }
}

impl From<u64> for TimeTag {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<TimeTag> for u64 {
    fn from(tag: TimeTag) -> Self {
        tag.0
    }
}
