//! Sequence-number / picture-ID remapping under selective layer drop
//! (spec.md §4.5).
//!
//! Every seqno a [`PacketMap`] is asked about is either mapped through
//! to an outgoing seqno (a packet this subscriber forwards) or dropped
//! (a packet from a layer this subscriber doesn't want). Dropping
//! compresses the outgoing seqno space so the downstream endpoint never
//! sees a gap it would mistake for loss, and the running "picture-ID
//! delta" does the same for whichever codec's rewriter needs to patch a
//! picture ID (VP8's [`crate::codec::vp8::rewrite`]).

use std::collections::VecDeque;

use crate::cache::seq::seq_diff;

/// History retained for `reverse` lookups and out-of-order replays.
const HISTORY_CAPACITY: usize = 1024;

/// A forward jump at least this large is treated as a fresh stream
/// rather than continued loss, clearing history and resetting deltas.
const LARGE_JUMP_THRESHOLD: i32 = 32_000;

#[derive(Debug, Clone, Copy)]
struct HistoryEntry {
    src_seqno: u16,
    out_seqno: u16,
    pid_delta: u16,
}

#[derive(Debug, Default)]
pub struct PacketMap {
    seqno_delta: u16,
    pid_delta: u16,

    top_seqno: Option<u16>,
    last_pid: Option<u16>,
    /// Set once a drop() for a new picture id has bumped `pid_delta`, so
    /// a later drop() of the *same* picture id doesn't double-count it.
    last_dropped_pid: Option<u16>,

    history: VecDeque<HistoryEntry>,
}

impl PacketMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.seqno_delta = 0;
        self.pid_delta = 0;
        self.top_seqno = None;
        self.last_pid = None;
        self.last_dropped_pid = None;
        self.history.clear();
    }

    fn push_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    fn find_history(&self, src_seqno: u16) -> Option<HistoryEntry> {
        self.history.iter().rev().find(|e| e.src_seqno == src_seqno).copied()
    }

    /// `extends_top` is true the first time a seqno strictly beyond the
    /// highest one processed so far (map or drop) is seen.
    fn extends_top(&mut self, seqno: u16) -> bool {
        match self.top_seqno {
            None => {
                self.top_seqno = Some(seqno);
                true
            }
            Some(top) => {
                let diff = seq_diff(seqno, top);
                if diff > 0 {
                    self.top_seqno = Some(seqno);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Maps one packet through. Returns `(in_window, out_seqno,
    /// pid_delta)`; `pid_delta` is the value the caller passes to a
    /// codec rewriter as the picture-ID delta.
    pub fn map(&mut self, src_seqno: u16, src_pid: u16) -> (bool, u16, u16) {
        if let Some(top) = self.top_seqno {
            if seq_diff(src_seqno, top) >= LARGE_JUMP_THRESHOLD {
                self.reset();
            }
        }

        if let Some(hit) = self.find_history(src_seqno) {
            return (true, hit.out_seqno, hit.pid_delta);
        }

        let extends = self.extends_top(src_seqno);
        if !extends {
            // Out-of-order and predates anything we have history for:
            // pass through unchanged, we have no adjustment to apply.
            return (true, src_seqno, 0);
        }

        if self.last_pid != Some(src_pid) {
            self.last_pid = Some(src_pid);
        }

        let out_seqno = src_seqno.wrapping_sub(self.seqno_delta);
        let entry = HistoryEntry {
            src_seqno,
            out_seqno,
            pid_delta: self.pid_delta,
        };
        self.push_history(entry);
        (true, out_seqno, self.pid_delta)
    }

    /// Records that `src_seqno` (from picture `src_pid`) will not be
    /// emitted. Increments `seqno_delta` only if this seqno extends the
    /// top of the window (i.e. is itself new, not a retroactive drop of
    /// something already mapped). Increments `pid_delta` the first time
    /// a picture is seen being dropped, so a whole dropped frame costs
    /// the downstream picture-ID sequence exactly one step.
    pub fn drop(&mut self, src_seqno: u16, src_pid: u16) -> bool {
        if let Some(top) = self.top_seqno {
            if seq_diff(src_seqno, top) >= LARGE_JUMP_THRESHOLD {
                self.reset();
            }
        }

        let extends = self.extends_top(src_seqno);
        if extends {
            self.seqno_delta = self.seqno_delta.wrapping_add(1);
        }

        if self.last_pid != Some(src_pid) && self.last_dropped_pid != Some(src_pid) {
            self.pid_delta = self.pid_delta.wrapping_add(1);
            self.last_dropped_pid = Some(src_pid);
        }
        self.last_pid = Some(src_pid);

        true
    }

    /// Recovers `(known, src_seqno, pid_delta)` for a previously mapped
    /// outgoing seqno, used to translate a NACK's downstream seqnos back
    /// to upstream ones the cache can answer.
    pub fn reverse(&self, out_seqno: u16) -> (bool, u16, u16) {
        match self.history.iter().rev().find(|e| e.out_seqno == out_seqno) {
            Some(e) => (true, e.src_seqno, e.pid_delta),
            None => (false, 0, 0),
        }
    }
}
