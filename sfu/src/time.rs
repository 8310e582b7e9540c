//! Jiffy clock and NTP <-> wall-clock conversions.
//!
//! Jiffies are the internal monotonic time unit, ticking at
//! `JIFFIES_PER_SEC = lcm(48000, 96000, 65536) = 24_576_000` Hz -- a rate
//! evenly divisible by every RTP clock rate this SFU forwards (8k/16k/48k
//! audio, 90k video) and by 65536, so jiffy-domain arithmetic never loses
//! precision converting to or from any of them.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const JIFFIES_PER_SEC: u64 = 24_576_000;

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch
/// (1970-01-01), per RFC 5905.
const NTP_UNIX_EPOCH_OFFSET_SECS: u64 = 2_208_988_800;

/// Current wall-clock time expressed in jiffies since the Unix epoch.
pub fn now_jiffies() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    duration_to_jiffies(since_epoch)
}

pub fn duration_to_jiffies(d: Duration) -> u64 {
    d.as_secs()
        .saturating_mul(JIFFIES_PER_SEC)
        .saturating_add((d.subsec_nanos() as u64 * JIFFIES_PER_SEC) / 1_000_000_000)
}

pub fn jiffies_to_duration(jiffies: u64) -> Duration {
    let secs = jiffies / JIFFIES_PER_SEC;
    let rem = jiffies % JIFFIES_PER_SEC;
    let nanos = (rem * 1_000_000_000) / JIFFIES_PER_SEC;
    Duration::new(secs, nanos as u32)
}

/// A 64-bit NTP timestamp: upper 32 bits are seconds since 1900-01-01 UTC,
/// lower 32 bits are a binary fraction of a second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtpTime(pub u64);

impl NtpTime {
    pub fn from_jiffies(jiffies: u64) -> Self {
        let secs = jiffies / JIFFIES_PER_SEC + NTP_UNIX_EPOCH_OFFSET_SECS;
        let rem = jiffies % JIFFIES_PER_SEC;
        let frac = ((rem as u128) << 32) / JIFFIES_PER_SEC as u128;
        NtpTime((secs << 32) | (frac as u32 as u64))
    }

    pub fn to_jiffies(self) -> u64 {
        let secs = (self.0 >> 32).saturating_sub(NTP_UNIX_EPOCH_OFFSET_SECS);
        let frac = self.0 & 0xFFFF_FFFF;
        let rem = ((frac as u128 * JIFFIES_PER_SEC as u128) >> 32) as u64;
        secs.saturating_mul(JIFFIES_PER_SEC) + rem
    }

    /// The middle 32 bits used by RTCP SR/RR "last SR" fields.
    pub fn middle_bits(self) -> u32 {
        ((self.0 >> 16) & 0xFFFF_FFFF) as u32
    }
}

#[cfg(test)]
mod time_test;
