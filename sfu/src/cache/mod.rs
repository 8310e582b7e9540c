//! Ring buffer of recent RTP packets, loss bitmap, reception statistics and
//! last-keyframe assembly (spec.md §3 "PacketCache", §4.1).

mod bitmap;
mod keyframe;
pub(crate) mod seq;

use bytes::Bytes;

use self::bitmap::LossBitmap;
use self::keyframe::KeyframeBuffer;
use self::seq::seq_diff;
use crate::error::{Error, Result};

/// Rejected as invalid if a seqno arrives this far behind the recorded
/// last seqno (spec.md §3).
const INVALID_BEHIND_THRESHOLD: i32 = 256;

pub const MAX_PAYLOAD_LEN: usize = 1504;

#[derive(Debug, Clone, Default)]
struct Entry {
    seqno: u16,
    marker: bool,
    timestamp: u32,
    payload: Bytes,
}

impl Entry {
    fn present(&self) -> bool {
        !self.payload.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub received: u64,
    pub total_received: u64,
    pub expected: u64,
    pub total_expected: u64,
    pub extended_last_seqno: u32,
}

pub struct PacketCache {
    entries: Vec<Entry>,
    capacity: usize,
    tail: usize,

    last: Option<u16>,
    cycles: u16,

    total_expected: u64,
    total_received: u64,
    window_expected_base: u64,
    window_received_base: u64,

    bitmap: LossBitmap,
    keyframe: KeyframeBuffer,
}

impl PacketCache {
    pub fn new(capacity: usize) -> Self {
        PacketCache {
            entries: vec![Entry::default(); capacity],
            capacity,
            tail: 0,
            last: None,
            cycles: 0,
            total_expected: 0,
            total_received: 0,
            window_expected_base: 0,
            window_received_base: 0,
            bitmap: LossBitmap::new(),
            keyframe: KeyframeBuffer::new(),
        }
    }

    /// Inserts a packet into the ring at the tail, advancing the tail
    /// modulo capacity, updating the loss bitmap, statistics, and the
    /// buffered keyframe. Returns the bitmap base and the storage index,
    /// or an error if `seqno` is too far behind to be meaningful.
    pub fn store(
        &mut self,
        seqno: u16,
        ts: u32,
        is_keyframe_start: bool,
        marker: bool,
        payload: Bytes,
    ) -> Result<(u16, usize)> {
        if let Some(last) = self.last {
            if seq_diff(last, seqno) >= INVALID_BEHIND_THRESHOLD {
                return Err(Error::Other(format!(
                    "seqno {seqno} too far behind last {last}"
                )));
            }
        }

        self.update_stats(seqno);
        self.bitmap.mark(seqno);
        self.keyframe
            .insert(seqno, ts, is_keyframe_start, marker, payload.clone());

        let index = self.tail;
        self.entries[index] = Entry {
            seqno,
            marker,
            timestamp: ts,
            payload,
        };
        self.tail = (self.tail + 1) % self.capacity;

        Ok((self.bitmap.first(), index))
    }

    fn update_stats(&mut self, seqno: u16) {
        match self.last {
            None => {
                self.last = Some(seqno);
                self.total_expected += 1;
                self.total_received += 1;
            }
            Some(last) => {
                let diff = seq_diff(seqno, last);
                if diff > 0 {
                    if seqno < last {
                        self.cycles = self.cycles.wrapping_add(1);
                    }
                    self.total_expected += diff as u64;
                    self.total_received += 1;
                    self.last = Some(seqno);
                } else if self.total_received < self.total_expected {
                    self.total_received += 1;
                }
            }
        }
    }

    /// Increments the expected counter without a corresponding arrival
    /// (used when a NACK is sent, so retransmits don't inflate loss
    /// fractions once they do arrive).
    pub fn expect(&mut self, n: u64) {
        self.total_expected += n;
    }

    pub fn stats(&mut self, reset: bool) -> Stats {
        let extended_last_seqno = ((self.cycles as u32) << 16) | self.last.unwrap_or(0) as u32;
        let s = Stats {
            received: self.total_received - self.window_received_base,
            total_received: self.total_received,
            expected: self.total_expected - self.window_expected_base,
            total_expected: self.total_expected,
            extended_last_seqno,
        };
        if reset {
            self.window_received_base = self.total_received;
            self.window_expected_base = self.total_expected;
        }
        s
    }

    /// Searches the keyframe buffer first, then the ring. Returns the
    /// payload bytes, or `None` if absent/overwritten by both.
    pub fn get(&self, seqno: u16) -> Option<Bytes> {
        if let Some(payload) = self.keyframe.get(seqno) {
            return Some(payload);
        }
        for e in &self.entries {
            if e.present() && e.seqno == seqno {
                return Some(e.payload.clone());
            }
        }
        None
    }

    /// O(1) direct access; returns `None` if the slot has been
    /// overwritten by a different seqno since `store` returned `index`.
    pub fn get_at(&self, seqno: u16, index: usize) -> Option<Bytes> {
        let e = self.entries.get(index)?;
        if e.present() && e.seqno == seqno {
            Some(e.payload.clone())
        } else {
            None
        }
    }

    pub fn bitmap_get(&self, next: u16) -> (bool, u16, u16) {
        self.bitmap.bitmap_get(next)
    }

    pub fn last(&self) -> Option<(u16, u32)> {
        let last = self.last?;
        self.entries
            .iter()
            .find(|e| e.present() && e.seqno == last)
            .map(|e| (e.seqno, e.timestamp))
    }

    pub fn keyframe(&self) -> (u32, bool, Vec<u16>) {
        (self.keyframe.timestamp(), self.keyframe.complete(), self.keyframe.seqnos())
    }

    pub fn keyframe_seqno(&self) -> Option<(u16, u32)> {
        self.keyframe
            .seqnos()
            .first()
            .map(|&s| (s, self.keyframe.timestamp()))
    }

    /// Explicit gap-fill: if the buffered keyframe is incomplete, walks
    /// the ring outward from its known entries to pull in any
    /// intermediate or trailing same-timestamp packets still cached
    /// (spec.md §4.1). Callers needing a complete replay (e.g. on a new
    /// subscriber) should call this before `keyframe()`/`get()`.
    pub fn complete_keyframe(&mut self) -> bool {
        let entries = &self.entries;
        self.keyframe.complete_keyframe(|seqno| {
            entries
                .iter()
                .find(|e| e.present() && e.seqno == seqno)
                .map(|e| (e.timestamp, e.marker, e.payload.clone()))
        })
    }

    /// Resizes unconditionally, discarding all buffered packets.
    pub fn resize(&mut self, capacity: usize) {
        self.entries = vec![Entry::default(); capacity];
        self.capacity = capacity;
        self.tail = 0;
    }

    /// Refuses to resize if the current capacity is already within
    /// `[3/4 * new, 2 * new)`, or if shrinking would invalidate the
    /// current tail index.
    pub fn resize_cond(&mut self, capacity: usize) -> Result<()> {
        if self.capacity >= (capacity * 3) / 4 && self.capacity < capacity * 2 {
            return Err(Error::ResizeRefused);
        }
        if capacity < self.capacity && self.tail > capacity {
            return Err(Error::ResizeRefused);
        }
        self.resize(capacity);
        Ok(())
    }
}

#[cfg(test)]
mod cache_test;
