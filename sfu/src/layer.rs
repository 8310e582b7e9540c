//! Simulcast/SVC layer selection state, packed into one atomic 32-bit
//! word per DownTrack (spec.md §4.8, §4.12 "DownTrack layer").

use std::sync::atomic::{AtomicU32, Ordering};

/// Each field gets 4 bits: spatial/temporal layer indices never exceed
/// VP9's own limit of 5 spatial layers, so 4 bits (0-15) is headroom,
/// not a tight fit.
const FIELD_BITS: u32 = 4;
const FIELD_MASK: u32 = 0xF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerInfo {
    pub sid: u8,
    pub wanted_sid: u8,
    pub max_sid: u8,
    pub limit_sid: bool,
    pub tid: u8,
    pub wanted_tid: u8,
    pub max_tid: u8,
}

impl Default for LayerInfo {
    fn default() -> Self {
        LayerInfo {
            sid: 0,
            wanted_sid: 0,
            max_sid: 0,
            limit_sid: false,
            tid: 0,
            wanted_tid: 0,
            max_tid: 0,
        }
    }
}

impl LayerInfo {
    fn pack(self) -> u32 {
        let mut w = 0u32;
        w |= (self.sid as u32 & FIELD_MASK) << (FIELD_BITS * 0);
        w |= (self.wanted_sid as u32 & FIELD_MASK) << (FIELD_BITS * 1);
        w |= (self.max_sid as u32 & FIELD_MASK) << (FIELD_BITS * 2);
        w |= (self.limit_sid as u32) << (FIELD_BITS * 3);
        w |= (self.tid as u32 & FIELD_MASK) << (FIELD_BITS * 4);
        w |= (self.wanted_tid as u32 & FIELD_MASK) << (FIELD_BITS * 5);
        w |= (self.max_tid as u32 & FIELD_MASK) << (FIELD_BITS * 6);
        w
    }

    fn unpack(w: u32) -> Self {
        LayerInfo {
            sid: ((w >> (FIELD_BITS * 0)) & FIELD_MASK) as u8,
            wanted_sid: ((w >> (FIELD_BITS * 1)) & FIELD_MASK) as u8,
            max_sid: ((w >> (FIELD_BITS * 2)) & FIELD_MASK) as u8,
            limit_sid: ((w >> (FIELD_BITS * 3)) & 0x1) != 0,
            tid: ((w >> (FIELD_BITS * 4)) & FIELD_MASK) as u8,
            wanted_tid: ((w >> (FIELD_BITS * 5)) & FIELD_MASK) as u8,
            max_tid: ((w >> (FIELD_BITS * 6)) & FIELD_MASK) as u8,
        }
    }
}

pub struct AtomicLayerState(AtomicU32);

impl Default for AtomicLayerState {
    fn default() -> Self {
        AtomicLayerState(AtomicU32::new(LayerInfo::default().pack()))
    }
}

impl AtomicLayerState {
    pub fn load(&self) -> LayerInfo {
        LayerInfo::unpack(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, info: LayerInfo) {
        self.0.store(info.pack(), Ordering::SeqCst);
    }

    /// Read-modify-write round trip; contention is a single writer per
    /// DownTrack so this never needs compare_exchange.
    pub fn update(&self, f: impl FnOnce(LayerInfo) -> LayerInfo) -> LayerInfo {
        let next = f(self.load());
        self.store(next);
        next
    }

    /// Applied on each forwarded packet's (tid, sid), updating observed
    /// maxima and the current/wanted layer per spec.md §4.8's bullets.
    /// `frame_start` gates the wanted-tracking jump rules; `keyframe`
    /// and `tid_up_sync` gate upward transitions.
    #[allow(clippy::too_many_arguments)]
    pub fn on_packet(
        &self,
        tid: u8,
        sid: u8,
        frame_start: bool,
        keyframe: bool,
        tid_up_sync: bool,
    ) -> LayerInfo {
        self.update(|mut l| {
            if tid > l.max_tid {
                let was_at_max = l.tid == l.max_tid;
                l.max_tid = tid;
                if was_at_max && l.wanted_tid == l.max_tid.saturating_sub(1) {
                    l.wanted_tid = tid;
                }
            }
            if sid > l.max_sid && !l.limit_sid {
                let was_at_max = l.sid == l.max_sid;
                l.max_sid = sid;
                if was_at_max && l.wanted_sid == l.max_sid.saturating_sub(1) {
                    l.wanted_sid = sid;
                }
            }

            if frame_start {
                if tid != l.wanted_tid {
                    if tid < l.wanted_tid {
                        l.tid = tid;
                    } else if keyframe || (tid_up_sync && tid <= l.wanted_tid) {
                        l.tid = tid;
                    }
                }
                if sid != l.wanted_sid && keyframe {
                    l.sid = sid;
                }
            }

            l
        })
    }

    /// Should this packet be dropped by the current layer selection
    /// (spec.md §4.8's drop bullet)?
    pub fn should_drop(&self, tid: u8, sid: u8, sid_non_reference: bool) -> bool {
        let l = self.load();
        tid > l.tid || sid > l.sid || (sid < l.sid && sid_non_reference)
    }

    /// Stepwise bitrate-driven tuning, invoked on every RTCP report or
    /// REMB that mutates the allowable bitrate (spec.md §4.8
    /// "adjustLayer").
    pub fn adjust_layer(&self, observed_bps: u64, allowed_bps: u64) -> LayerInfo {
        self.update(|mut l| {
            if observed_bps * 8 < allowed_bps * 7 {
                if !l.limit_sid && l.wanted_sid < l.max_sid {
                    l.wanted_sid += 1;
                } else if l.wanted_tid < l.max_tid {
                    l.wanted_tid += 1;
                }
            } else if observed_bps * 2 > allowed_bps * 3 {
                if l.wanted_tid > 0 {
                    l.wanted_tid -= 1;
                } else if l.wanted_sid > 0 {
                    l.wanted_sid -= 1;
                }
            }
            l
        })
    }

    /// Forces `wanted_sid = 0` and disables spatial-layer climbing.
    pub fn limit_to_lowest_spatial(&self) {
        self.update(|mut l| {
            l.limit_sid = true;
            l.wanted_sid = 0;
            l
        });
    }
}
