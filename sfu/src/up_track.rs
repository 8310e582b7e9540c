//! One upstream RTP stream: owns its cache, rate/jitter estimators, and
//! the pool that fans packets out to subscribers. Runs the reader loop
//! that drains RTP off the network endpoint (spec.md §2, §3 "UpTrack",
//! §4.6).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use rtcp::packet::Packet as RtcpPacket;
use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use rtcp::transport_feedbacks::transport_layer_nack::{
    nack_pairs_from_sequence_numbers, NackPair, TransportLayerNack,
};
use tokio::sync::mpsc::UnboundedReceiver;
use util::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::cache::seq::seq_diff;
use crate::cache::PacketCache;
use crate::codec_params::CodecParams;
use crate::down_track::DownTrack;
use crate::endpoint::{RtcpWriter, RtpReader};
use crate::error::Result;
use crate::estimator::{JitterEstimator, RateEstimator};
use crate::mailbox::{Mailbox, TrackAction};
use crate::time::{now_jiffies, NtpTime, JIFFIES_PER_SEC};
use crate::writer_pool::{Dispatch, WriterPool};

const VIDEO_CACHE_CAPACITY: usize = 128;
const AUDIO_CACHE_CAPACITY: usize = 24;

const NACK_UNNACKED: u16 = 4;
const NACK_MIN_PKTS: u64 = 2;
const NACK_MAX_PKTS: u64 = 24;

/// NACKs are coalesced and sent at most this often per track (spec.md
/// §4.13).
const NACK_COALESCE_JIFFIES: u64 = JIFFIES_PER_SEC / 20;
/// At most this many NackPair records go out in one RTCP packet; the
/// rest of a pathologically large backlog is dropped rather than split
/// across packets (spec.md §4.13).
const NACK_MAX_PAIRS_PER_PACKET: usize = 240;
/// With no buffered keyframe to anchor the cutoff, seqnos more than this
/// far behind the most recent arrival are assumed unrecoverable.
const NACK_FALLBACK_WINDOW: u16 = 256;

const HIGH_RATE_PKTS_PER_SEC: u64 = 512;

/// PLI/FIR upstream requests are coalesced to at most one per this
/// interval per track (spec.md §4.13).
const KEYFRAME_REQUEST_RATE_LIMIT_JIFFIES: u64 = JIFFIES_PER_SEC / 2;

const MAX_RTP_PACKET_SIZE: usize = 1504;

/// The upstream sender report most recently observed for this track,
/// used to translate downstream SR timestamps (spec.md §3, §4.10).
#[derive(Debug, Clone, Copy)]
pub struct SenderReportTuple {
    pub jiffies: u64,
    pub ntp: NtpTime,
    pub rtp_timestamp: u32,
}

pub struct UpTrack {
    pub ssrc: u32,
    pub rid: String,
    pub codec: CodecParams,

    cache: Arc<Mutex<PacketCache>>,
    rate: Mutex<RateEstimator>,
    jitter: Mutex<JitterEstimator>,
    pool: Arc<WriterPool>,
    rtcp_writer: Arc<dyn RtcpWriter>,

    cname: Arc<Mutex<Option<String>>>,
    sr: Mutex<Option<SenderReportTuple>>,
    last_keyframe_request_jiffies: AtomicU64,

    /// Seqnos detected missing since the last NACK flush, deduplicated
    /// but unsorted (spec.md §4.13's coalescing buffer).
    nack_buffer: Mutex<Vec<u16>>,
    last_nack_flush_jiffies: AtomicU64,

    mailbox: Mailbox<TrackAction<Arc<DownTrack>>>,
}

impl UpTrack {
    pub fn new(
        ssrc: u32,
        rid: String,
        codec: CodecParams,
        rtcp_writer: Arc<dyn RtcpWriter>,
    ) -> (Arc<Self>, UnboundedReceiver<TrackAction<Arc<DownTrack>>>) {
        let capacity = if codec.is_video() {
            VIDEO_CACHE_CAPACITY
        } else {
            AUDIO_CACHE_CAPACITY
        };
        let cache = Arc::new(Mutex::new(PacketCache::new(capacity)));
        let cname = Arc::new(Mutex::new(None));
        let (mailbox, mailbox_rx) = Mailbox::new();
        let video_clock_rate = codec.is_video().then_some(codec.clock_rate);

        let pool = Arc::new(WriterPool::new(
            cache.clone(),
            cname.clone(),
            video_clock_rate,
            mailbox.clone(),
        ));

        let track = Arc::new(UpTrack {
            ssrc,
            rid,
            cache,
            rate: Mutex::new(RateEstimator::new(JIFFIES_PER_SEC, now_jiffies())),
            jitter: Mutex::new(JitterEstimator::new(codec.clock_rate)),
            pool,
            rtcp_writer,
            cname,
            sr: Mutex::new(None),
            last_keyframe_request_jiffies: AtomicU64::new(0),
            nack_buffer: Mutex::new(Vec::new()),
            last_nack_flush_jiffies: AtomicU64::new(0),
            mailbox,
            codec,
        });
        (track, mailbox_rx)
    }

    pub fn cache(&self) -> &Arc<Mutex<PacketCache>> {
        &self.cache
    }

    pub fn pool(&self) -> &Arc<WriterPool> {
        &self.pool
    }

    pub fn mailbox(&self) -> Mailbox<TrackAction<Arc<DownTrack>>> {
        self.mailbox.clone()
    }

    pub fn set_cname(&self, cname: String) {
        *self.cname.lock().unwrap() = Some(cname);
    }

    pub fn cname(&self) -> Option<String> {
        self.cname.lock().unwrap().clone()
    }

    pub fn set_sender_report(&self, ntp: NtpTime, rtp_timestamp: u32) {
        *self.sr.lock().unwrap() = Some(SenderReportTuple {
            jiffies: now_jiffies(),
            ntp,
            rtp_timestamp,
        });
    }

    pub fn sender_report(&self) -> Option<SenderReportTuple> {
        *self.sr.lock().unwrap()
    }

    pub fn byte_rate(&self) -> u64 {
        self.rate.lock().unwrap().estimate(now_jiffies()).0
    }

    pub fn packet_rate(&self) -> u64 {
        self.rate.lock().unwrap().estimate(now_jiffies()).1
    }

    pub fn jitter(&self) -> u32 {
        self.jitter.lock().unwrap().jitter()
    }

    /// Sends a PictureLossIndication to the publisher, rate-limited to at
    /// most once per 0.5s so a burst of subscriber-side drops doesn't
    /// flood the publisher with redundant requests.
    pub async fn request_keyframe(&self) -> Result<()> {
        let now = now_jiffies();
        let last = self.last_keyframe_request_jiffies.load(Ordering::Acquire);
        if last != 0 && now.saturating_sub(last) < KEYFRAME_REQUEST_RATE_LIMIT_JIFFIES {
            return Ok(());
        }
        self.last_keyframe_request_jiffies.store(now, Ordering::Release);

        let pli = PictureLossIndication {
            sender_ssrc: 0,
            media_ssrc: self.ssrc,
        };
        let pkts: Vec<Box<dyn RtcpPacket + Send + Sync>> = vec![Box::new(pli)];
        self.rtcp_writer.write(&pkts).await?;
        Ok(())
    }

    /// Drains RTP off `reader` until EOF or error, driving the cache,
    /// estimators, NACK generation and writer pool dispatch (spec.md
    /// §4.6's 9 steps). Exits (and tears down the pool) on read failure.
    pub async fn run(
        self: Arc<Self>,
        reader: Arc<dyn RtpReader>,
        mut mailbox_rx: UnboundedReceiver<TrackAction<Arc<DownTrack>>>,
    ) {
        let mut buf = vec![0u8; MAX_RTP_PACKET_SIZE];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    log::debug!("up track {} reader closed: {}", self.ssrc, err);
                    break;
                }
            };

            if let Err(err) = self.handle_packet(&buf[..n]).await {
                log::debug!("up track {} dropped packet: {}", self.ssrc, err);
            }

            while let Ok(action) = mailbox_rx.try_recv() {
                self.handle_action(action).await;
            }
        }

        if let Err(err) = self.flush_nacks(now_jiffies()).await {
            log::debug!("up track {} final nack flush failed: {}", self.ssrc, err);
        }
    }

    async fn handle_action(&self, action: TrackAction<Arc<DownTrack>>) {
        match action {
            TrackAction::AddLocal(track) => self.pool.add(track),
            TrackAction::DelLocal(ssrc) => self.pool.remove(ssrc),
            TrackAction::RequestKeyframe => {
                if let Err(err) = self.request_keyframe().await {
                    log::warn!("up track {} keyframe request failed: {}", self.ssrc, err);
                }
            }
        }
    }

    async fn handle_packet(&self, raw: &[u8]) -> Result<()> {
        let mut b = Bytes::copy_from_slice(raw);
        let mut packet = rtp::packet::Packet::unmarshal(&mut b)?;

        {
            let mut rate = self.rate.lock().unwrap();
            rate.accumulate(raw.len());
            rate.estimate(now_jiffies());
        }

        let wall_in_clock_units = jiffies_to_clock_units(now_jiffies(), self.codec.clock_rate);
        self.jitter
            .lock()
            .unwrap()
            .update(wall_in_clock_units, packet.header.timestamp);

        let rtp_payload = packet.payload.clone();
        let (flags, _ctx) = crate::codec::inspect(self.codec.kind(), &rtp_payload)?;

        packet.header.extension = false;
        packet.header.extensions.clear();

        let seqno = packet.header.sequence_number;
        let ts = packet.header.timestamp;
        let marker = packet.header.marker;

        let mut stored = vec![0u8; packet.marshal_size()];
        packet.marshal_to(&mut stored)?;

        let (first, index) = {
            let mut cache = self.cache.lock().unwrap();
            cache.store(seqno, ts, flags.is_keyframe_start(), marker, Bytes::from(stored))?
        };

        self.maybe_send_nack(seqno, first).await?;

        let pkts_per_sec = self.packet_rate();
        let delay = if pkts_per_sec > HIGH_RATE_PKTS_PER_SEC {
            Duration::from_secs_f64(1.0 / (pkts_per_sec as f64 * 2.0))
        } else {
            Duration::from_secs_f64(1.0 / 1024.0)
        };

        self.pool
            .dispatch(Dispatch {
                seqno,
                index,
                delay,
                is_video: self.codec.is_video(),
                marker,
            })
            .await;

        Ok(())
    }

    /// Records any newly-missing seqnos into the coalescing buffer, then
    /// flushes it if the 50ms window has elapsed (spec.md §4.13).
    async fn maybe_send_nack(&self, seqno: u16, _bitmap_first: u16) -> Result<()> {
        if !self.codec.supports_nack() {
            return Ok(());
        }

        let pkts = (self.packet_rate() / 50).clamp(NACK_MIN_PKTS, NACK_MAX_PKTS) as u16;
        let probe_from = seqno.wrapping_sub(NACK_UNNACKED.min(pkts));

        let (any_missing, first_missing, follow) = {
            let cache = self.cache.lock().unwrap();
            cache.bitmap_get(probe_from)
        };
        if any_missing {
            let pair = NackPair {
                packet_id: first_missing,
                lost_packets: follow,
            };
            let mut buf = self.nack_buffer.lock().unwrap();
            for s in pair {
                if !buf.contains(&s) {
                    buf.push(s);
                }
            }
        }

        let now = now_jiffies();
        let last = self.last_nack_flush_jiffies.load(Ordering::Acquire);
        if last != 0 && now.saturating_sub(last) < NACK_COALESCE_JIFFIES {
            return Ok(());
        }
        self.flush_nacks(now).await
    }

    /// Sends whatever's in the coalescing buffer as one RTCP packet,
    /// dropping seqnos older than the last buffered keyframe (or
    /// `last - 256` when no keyframe is buffered) and capping the pair
    /// count per spec.md §4.13.
    async fn flush_nacks(&self, now_jiffies: u64) -> Result<()> {
        let mut pending: Vec<u16> = {
            let mut buf = self.nack_buffer.lock().unwrap();
            std::mem::take(&mut *buf)
        };
        self.last_nack_flush_jiffies.store(now_jiffies, Ordering::Release);
        if pending.is_empty() {
            return Ok(());
        }

        let cutoff = {
            let cache = self.cache.lock().unwrap();
            match cache.keyframe_seqno() {
                Some((kf_seqno, _)) => kf_seqno,
                None => cache
                    .last()
                    .map(|(last, _)| last.wrapping_sub(NACK_FALLBACK_WINDOW))
                    .unwrap_or(0),
            }
        };
        pending.retain(|&s| seq_diff(s, cutoff) >= 0);
        if pending.is_empty() {
            return Ok(());
        }
        pending.sort_by_key(|&s| seq_diff(s, cutoff));
        pending.dedup();

        let mut pairs = nack_pairs_from_sequence_numbers(&pending);
        if pairs.len() > NACK_MAX_PAIRS_PER_PACKET {
            log::debug!(
                "up track {} dropping {} nack pairs over the per-packet cap",
                self.ssrc,
                pairs.len() - NACK_MAX_PAIRS_PER_PACKET
            );
            pairs.truncate(NACK_MAX_PAIRS_PER_PACKET);
        }

        let nack = TransportLayerNack {
            sender_ssrc: 0,
            media_ssrc: self.ssrc,
            nacks: pairs,
        };
        let pkts_out: Vec<Box<dyn RtcpPacket + Send + Sync>> = vec![Box::new(nack)];
        self.rtcp_writer.write(&pkts_out).await?;

        self.cache.lock().unwrap().expect(pending.len() as u64);
        Ok(())
    }
}

fn jiffies_to_clock_units(jiffies: u64, clock_rate: u32) -> i64 {
    ((jiffies as u128 * clock_rate as u128) / JIFFIES_PER_SEC as u128) as i64
}

#[cfg(test)]
mod up_track_test;
