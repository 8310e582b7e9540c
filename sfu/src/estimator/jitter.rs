//! RFC 3550 interarrival jitter estimation (spec.md §4.3).

/// Tracks interarrival jitter `J` at a codec's clock rate. The reference
/// transit point is `(0, 0)` until the first packet, which only
/// initializes the reference and does not update `J`.
#[derive(Debug, Clone, Default)]
pub struct JitterEstimator {
    clock_rate: u32,
    have_reference: bool,
    transit_prev: i64,
    jitter: u32,
}

impl JitterEstimator {
    pub fn new(clock_rate: u32) -> Self {
        JitterEstimator {
            clock_rate,
            have_reference: false,
            transit_prev: 0,
            jitter: 0,
        }
    }

    /// `wall_jiffies` is the arrival wall-clock time already converted to
    /// the codec's clock-rate units; `rtp_ts` is the packet's RTP
    /// timestamp.
    pub fn update(&mut self, wall_in_clock_units: i64, rtp_ts: u32) {
        let transit = wall_in_clock_units - rtp_ts as i64;
        if !self.have_reference {
            self.transit_prev = transit;
            self.have_reference = true;
            return;
        }
        let delta = (transit - self.transit_prev).unsigned_abs() as u32;
        self.transit_prev = transit;
        // J += (|D| - J) / 16, saturating.
        let j = self.jitter as i64 + (delta as i64 - self.jitter as i64) / 16;
        self.jitter = j.max(0) as u32;
    }

    pub fn jitter(&self) -> u32 {
        self.jitter
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }
}

#[cfg(test)]
mod jitter_test;
