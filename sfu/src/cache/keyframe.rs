//! Last-keyframe assembly (spec.md §3 "Last keyframe frame", §4.1
//! "Keyframe assembly", §4.12 state machine).

use bytes::Bytes;

use super::seq::seq_diff;

#[derive(Debug, Clone, Default)]
pub struct KeyframeBuffer {
    timestamp: u32,
    started: bool,
    has_marker: bool,
    /// Sorted by seqno (spec.md §3 "sorted list of entries"); holds the
    /// payload itself so the frame survives ring eviction.
    entries: Vec<(u16, Bytes)>,
    /// Reused across `complete_keyframe` calls for the backward ring walk
    /// (spec.md §9: "one reusable scratch buffer per cache, lazily
    /// allocated on first need").
    scratch: Vec<(u16, Bytes)>,
}

impl KeyframeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn seqnos(&self) -> Vec<u16> {
        self.entries.iter().map(|(s, _)| *s).collect()
    }

    pub fn get(&self, seqno: u16) -> Option<Bytes> {
        self.entries
            .iter()
            .find(|(s, _)| *s == seqno)
            .map(|(_, payload)| payload.clone())
    }

    pub fn complete(&self) -> bool {
        self.started && self.has_marker && self.is_contiguous()
    }

    fn is_contiguous(&self) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        self.entries
            .windows(2)
            .all(|w| seq_diff(w[1].0, w[0].0) == 1)
    }

    /// Inserts a packet's seqno and payload into the buffered frame.
    ///
    /// On a new timestamp arriving with `is_keyframe_start`, the frame is
    /// reset to start at that packet. Packets matching the currently
    /// buffered timestamp are inserted in sorted order, duplicates
    /// dropped; anything else (a different, non-start timestamp) is
    /// ignored -- it belongs to a frame we haven't started tracking.
    pub fn insert(&mut self, seqno: u16, timestamp: u32, is_keyframe_start: bool, marker: bool, payload: Bytes) {
        if is_keyframe_start && timestamp != self.timestamp {
            self.timestamp = timestamp;
            self.started = true;
            self.has_marker = marker;
            self.entries = vec![(seqno, payload)];
            return;
        }

        if !self.started || timestamp != self.timestamp {
            return;
        }

        match self.entries.binary_search_by(|(s, _)| seq_diff(*s, seqno).cmp(&0)) {
            Ok(_) => {} // duplicate
            Err(pos) => self.entries.insert(pos, (seqno, payload)),
        }
        if marker {
            self.has_marker = true;
        }
    }

    /// Gap-fills the buffered frame from the ring when an insert left it
    /// incomplete. Three phases, each stopping at the first seqno
    /// `ring_lookup` can't account for: walk backward from the first
    /// frame entry (a same-timestamp packet that arrived before the
    /// start packet was recognized, so `insert` dropped it); fill any
    /// intermediate holes already spanned by the frame's current range
    /// (reordering can leave one mid-frame); then walk forward from the
    /// last entry appending until the marker packet is found or a real
    /// hole is hit (spec.md §4.1).
    ///
    /// `ring_lookup(seqno)` returns `(timestamp, marker, payload)` for a
    /// seqno still held by the ring, or `None` if evicted/never stored.
    pub fn complete_keyframe<F>(&mut self, mut ring_lookup: F) -> bool
    where
        F: FnMut(u16) -> Option<(u32, bool, Bytes)>,
    {
        if !self.started || self.complete() {
            return self.complete();
        }
        let Some(&(first_seqno, _)) = self.entries.first() else {
            return false;
        };

        self.scratch.clear();
        let mut seqno = first_seqno;
        loop {
            seqno = seqno.wrapping_sub(1);
            match ring_lookup(seqno) {
                Some((ts, _marker, payload)) if ts == self.timestamp => self.scratch.push((seqno, payload)),
                _ => break,
            }
        }
        while let Some(entry) = self.scratch.pop() {
            self.entries.insert(0, entry);
        }

        let last_seqno = self.entries.last().map(|(s, _)| *s).unwrap_or(first_seqno);
        let mut seqno = self.entries.first().map(|(s, _)| *s).unwrap_or(first_seqno);
        while seqno != last_seqno {
            seqno = seqno.wrapping_add(1);
            if self.entries.iter().any(|(s, _)| *s == seqno) {
                continue;
            }
            match ring_lookup(seqno) {
                Some((ts, marker, payload)) if ts == self.timestamp => {
                    let pos = self
                        .entries
                        .binary_search_by(|(s, _)| seq_diff(*s, seqno).cmp(&0))
                        .unwrap_err();
                    self.entries.insert(pos, (seqno, payload));
                    if marker {
                        self.has_marker = true;
                    }
                }
                _ => return false, // a genuine loss inside the spanned range
            }
        }

        let mut seqno = last_seqno;
        loop {
            seqno = seqno.wrapping_add(1);
            match ring_lookup(seqno) {
                Some((ts, marker, payload)) if ts == self.timestamp => {
                    self.entries.push((seqno, payload));
                    if marker {
                        self.has_marker = true;
                        break;
                    }
                }
                _ => break,
            }
        }

        self.complete()
    }
}

#[cfg(test)]
mod keyframe_test;
