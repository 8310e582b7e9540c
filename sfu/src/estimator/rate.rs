//! Byte/packet rate over a sliding interval (spec.md §4.2).

use crate::time::JIFFIES_PER_SEC;

/// Tracks byte and packet counts over a rolling `interval`, producing a
/// per-second rate on each rollover. `accumulate` never blocks and never
/// rolls the window itself; `estimate` performs the rollover check.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    interval_jiffies: u64,
    anchor_jiffies: u64,
    pending_bytes: u64,
    pending_packets: u64,
    total_bytes: u64,
    total_packets: u64,
    byte_rate: u64,
    packet_rate: u64,
}

impl RateEstimator {
    pub fn new(interval_jiffies: u64, now_jiffies: u64) -> Self {
        RateEstimator {
            interval_jiffies,
            anchor_jiffies: now_jiffies,
            pending_bytes: 0,
            pending_packets: 0,
            total_bytes: 0,
            total_packets: 0,
            byte_rate: 0,
            packet_rate: 0,
        }
    }

    /// Adds `n` bytes and one packet to the pending window.
    pub fn accumulate(&mut self, n: usize) {
        self.pending_bytes = self.pending_bytes.saturating_add(n as u64);
        self.pending_packets = self.pending_packets.saturating_add(1);
    }

    /// Rolls the window if due, and returns the current (byte_rate,
    /// packet_rate) in units/s.
    pub fn estimate(&mut self, now_jiffies: u64) -> (u64, u64) {
        if now_jiffies < self.anchor_jiffies && self.anchor_jiffies - now_jiffies > self.interval_jiffies
        {
            // backwards clock jump exceeding the interval: reset.
            self.anchor_jiffies = now_jiffies;
            self.pending_bytes = 0;
            self.pending_packets = 0;
            self.byte_rate = 0;
            self.packet_rate = 0;
            return (0, 0);
        }

        let elapsed = now_jiffies.saturating_sub(self.anchor_jiffies);
        if elapsed >= self.interval_jiffies {
            if elapsed > 0 {
                self.byte_rate = self.pending_bytes.saturating_mul(JIFFIES_PER_SEC) / elapsed;
                self.packet_rate = self.pending_packets.saturating_mul(JIFFIES_PER_SEC) / elapsed;
            }
            self.total_bytes = self.total_bytes.saturating_add(self.pending_bytes);
            self.total_packets = self.total_packets.saturating_add(self.pending_packets);
            self.pending_bytes = 0;
            self.pending_packets = 0;
            self.anchor_jiffies = now_jiffies;
        }

        (self.byte_rate, self.packet_rate)
    }

    pub fn totals(&self) -> (u64, u64) {
        (
            self.total_bytes + self.pending_bytes,
            self.total_packets + self.pending_packets,
        )
    }
}

#[cfg(test)]
mod rate_test;
