//! One outgoing RTP stream subscribing to an UpTrack (spec.md §3
//! "DownTrack", §4.7, §4.8).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use util::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::codec::{self, CodecKind, RewriteContext};
use crate::endpoint::RtpWriter;
use crate::error::Result;
use crate::estimator::RateEstimator;
use crate::layer::AtomicLayerState;
use crate::mailbox::{Mailbox, TrackAction};
use crate::packet_map::PacketMap;
use crate::time::{now_jiffies, NtpTime};

/// RTCP-derived state mutated by the down-path generator/listener and
/// read by the layer selector, kept as plain atomics rather than behind
/// a lock since each field is updated independently (spec.md §5 "Atomic
/// words").
#[derive(Default)]
struct RtcpState {
    remote_ntp: AtomicU64,
    remote_rtp_timestamp: AtomicU32,
    has_remote_sr: AtomicBool,

    last_sr_jiffies: AtomicU64,
    last_sr_ntp: AtomicU64,

    rtt_jiffies: AtomicU64,

    remb_bps: AtomicU64,
    remb_stamp_jiffies: AtomicU64,

    rr_loss_fraction: AtomicU32,
    rr_jitter: AtomicU32,
    rr_stamp_jiffies: AtomicU64,

    /// Our own loss-driven allowable-bitrate estimate (spec.md §4.11
    /// `updateRate`), distinct from the peer-reported REMB above.
    loss_rate_bps: AtomicU64,
    loss_rate_stamp_jiffies: AtomicU64,

    /// Last FIR sequence number acted on for this SSRC, so a repeated FIR
    /// with the same sequence number doesn't re-trigger a keyframe request.
    last_fir_seqno: AtomicU32,
    has_fir_seqno: AtomicBool,
}

pub struct DownTrack {
    pub ssrc: u32,
    pub codec: CodecKind,
    pub is_video: bool,

    writer: Arc<dyn RtpWriter>,
    packet_map: std::sync::Mutex<PacketMap>,
    layer: AtomicLayerState,
    rate: std::sync::Mutex<RateEstimator>,
    rtcp: RtcpState,

    /// Back channel to the upstream track this DownTrack subscribes to,
    /// used to ask for a fresh keyframe when a spatial-layer switch can't
    /// be completed at the current frame (spec.md §4.8).
    request_keyframe: Mailbox<TrackAction<Arc<DownTrack>>>,

    cname: std::sync::Mutex<Option<String>>,
    closed: AtomicBool,
}

impl DownTrack {
    pub fn new(
        ssrc: u32,
        codec: CodecKind,
        is_video: bool,
        writer: Arc<dyn RtpWriter>,
        request_keyframe: Mailbox<TrackAction<Arc<DownTrack>>>,
    ) -> Self {
        DownTrack {
            ssrc,
            codec,
            is_video,
            writer,
            packet_map: std::sync::Mutex::new(PacketMap::new()),
            layer: AtomicLayerState::default(),
            rate: std::sync::Mutex::new(RateEstimator::new(
                crate::time::JIFFIES_PER_SEC,
                now_jiffies(),
            )),
            rtcp: RtcpState::default(),
            request_keyframe,
            cname: std::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn set_cname(&self, cname: String) {
        *self.cname.lock().unwrap() = Some(cname);
    }

    pub fn cname(&self) -> Option<String> {
        self.cname.lock().unwrap().clone()
    }

    /// Records the upstream {NTP, RTP} tuple carried by the most recent
    /// sender report, used by the down-path generator to translate its
    /// own SR timestamps (spec.md §3, §4.10).
    pub fn set_remote_sender_report(&self, ntp: NtpTime, rtp_timestamp: u32) {
        self.rtcp.remote_ntp.store(ntp.0, Ordering::SeqCst);
        self.rtcp
            .remote_rtp_timestamp
            .store(rtp_timestamp, Ordering::SeqCst);
        self.rtcp.has_remote_sr.store(true, Ordering::SeqCst);
    }

    pub fn remote_sender_report(&self) -> Option<(NtpTime, u32)> {
        if !self.rtcp.has_remote_sr.load(Ordering::SeqCst) {
            return None;
        }
        Some((
            NtpTime(self.rtcp.remote_ntp.load(Ordering::SeqCst)),
            self.rtcp.remote_rtp_timestamp.load(Ordering::SeqCst),
        ))
    }

    pub fn record_sent_sender_report(&self, jiffies: u64, ntp: NtpTime) {
        self.rtcp.last_sr_jiffies.store(jiffies, Ordering::SeqCst);
        self.rtcp.last_sr_ntp.store(ntp.0, Ordering::SeqCst);
    }

    pub fn last_sent_sender_report(&self) -> Option<(u64, NtpTime)> {
        let jiffies = self.rtcp.last_sr_jiffies.load(Ordering::SeqCst);
        if jiffies == 0 {
            return None;
        }
        Some((jiffies, NtpTime(self.rtcp.last_sr_ntp.load(Ordering::SeqCst))))
    }

    pub fn rtt_jiffies(&self) -> u64 {
        self.rtcp.rtt_jiffies.load(Ordering::SeqCst)
    }

    /// Applies the 3:1-weighted EWMA spec.md §4.11 describes.
    pub fn update_rtt(&self, sample_jiffies: u64) {
        let old = self.rtcp.rtt_jiffies.load(Ordering::SeqCst);
        let new = if old == 0 {
            sample_jiffies
        } else {
            (3 * old + sample_jiffies) / 4
        };
        self.rtcp.rtt_jiffies.store(new, Ordering::SeqCst);
    }

    pub fn set_remb(&self, bps: u64, now_jiffies: u64) {
        self.rtcp.remb_bps.store(bps, Ordering::SeqCst);
        self.rtcp
            .remb_stamp_jiffies
            .store(now_jiffies, Ordering::SeqCst);
    }

    pub fn remb(&self) -> Option<u64> {
        if self.rtcp.remb_stamp_jiffies.load(Ordering::SeqCst) == 0 {
            return None;
        }
        Some(self.rtcp.remb_bps.load(Ordering::SeqCst))
    }

    pub fn set_receiver_report_stats(&self, loss_fraction: u8, jitter: u32, now_jiffies: u64) {
        self.rtcp
            .rr_loss_fraction
            .store(loss_fraction as u32, Ordering::SeqCst);
        self.rtcp.rr_jitter.store(jitter, Ordering::SeqCst);
        self.rtcp.rr_stamp_jiffies.store(now_jiffies, Ordering::SeqCst);
    }

    pub fn receiver_report_stats(&self) -> Option<(u8, u32, u64)> {
        let stamp = self.rtcp.rr_stamp_jiffies.load(Ordering::SeqCst);
        if stamp == 0 {
            return None;
        }
        Some((
            self.rtcp.rr_loss_fraction.load(Ordering::SeqCst) as u8,
            self.rtcp.rr_jitter.load(Ordering::SeqCst),
            stamp,
        ))
    }

    pub fn sent_totals(&self) -> (u64, u64) {
        self.rate.lock().unwrap().totals()
    }

    pub fn loss_rate(&self) -> Option<(u64, u64)> {
        let stamp = self.rtcp.loss_rate_stamp_jiffies.load(Ordering::SeqCst);
        if stamp == 0 {
            return None;
        }
        Some((self.rtcp.loss_rate_bps.load(Ordering::SeqCst), stamp))
    }

    pub fn set_loss_rate(&self, bps: u64, now_jiffies: u64) {
        self.rtcp.loss_rate_bps.store(bps, Ordering::SeqCst);
        self.rtcp
            .loss_rate_stamp_jiffies
            .store(now_jiffies, Ordering::SeqCst);
    }

    /// Returns `true` if this is the first FIR seen for this SSRC, or one
    /// whose sequence number differs from the last acted on.
    pub fn fir_seqno_advanced(&self, seqno: u8) -> bool {
        let last = self.rtcp.last_fir_seqno.swap(seqno as u32, Ordering::SeqCst);
        let had_one = self.rtcp.has_fir_seqno.swap(true, Ordering::SeqCst);
        !had_one || last != seqno as u32
    }

    pub fn layer(&self) -> &AtomicLayerState {
        &self.layer
    }

    pub fn packet_map(&self) -> &std::sync::Mutex<PacketMap> {
        &self.packet_map
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Inspects, layer-filters, remaps and rewrites one cached packet
    /// before writing it out. Returns `Ok(0)` (not an error) when the
    /// current layer selection or PacketMap drops the packet.
    pub async fn write(&self, raw: &Bytes) -> Result<usize> {
        let mut b = raw.clone();
        let header = rtp::header::Header::unmarshal(&mut b)?;
        let header_size = header.marshal_size();
        let rtp_payload = raw.slice(header_size..);

        let (flags, ctx) = codec::inspect(self.codec, &rtp_payload)?;

        let tid = flags.temporal_id.unwrap_or(0);
        let sid = flags.spatial_id.unwrap_or(0);
        let keyframe = flags.is_keyframe_start();
        let info = self
            .layer
            .on_packet(tid, sid, flags.start, keyframe, flags.tid_up_sync);
        if flags.start && sid != info.wanted_sid && !keyframe {
            self.request_keyframe.send(TrackAction::RequestKeyframe);
        }
        if self.layer.should_drop(tid, sid, flags.sid_non_reference) {
            let mut map = self.packet_map.lock().unwrap();
            map.drop(header.sequence_number, flags.picture_id.unwrap_or(0) as u16);
            return Ok(0);
        }

        let (in_window, out_seqno, pid_delta) = {
            let mut map = self.packet_map.lock().unwrap();
            map.map(header.sequence_number, flags.picture_id.unwrap_or(0) as u16)
        };
        if !in_window {
            return Ok(0);
        }

        let mut out = raw.to_vec();
        if let RewriteContext::Vp8(vp8) = &ctx {
            codec::vp8::rewrite(&mut out, header_size, vp8, out_seqno, pid_delta);
        } else {
            out[2..4].copy_from_slice(&out_seqno.to_be_bytes());
        }

        let packet = rtp::packet::Packet::unmarshal(&mut Bytes::from(out))?;
        let n = self.writer.write(&packet).await?;

        {
            let mut rate = self.rate.lock().unwrap();
            rate.accumulate(n);
            rate.estimate(now_jiffies());
        }

        Ok(n)
    }

    pub fn byte_rate(&self) -> u64 {
        self.rate.lock().unwrap().estimate(now_jiffies()).0
    }
}

#[cfg(test)]
mod down_track_test;
