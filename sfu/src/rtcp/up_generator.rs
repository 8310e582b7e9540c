//! 1 Hz RTCP up-path generator: per-upstream-peer-connection
//! ReceiverReport + REMB composition, and cache-size tuning driven by
//! the worst-case subscriber RTT/jitter (spec.md §4.9).

use std::sync::Arc;

use rtcp::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;
use rtcp::receiver_report::ReceiverReport;
use rtcp::reception_report::ReceptionReport;

use crate::down_track::DownTrack;
use crate::time::{now_jiffies, JIFFIES_PER_SEC};
use crate::up_track::UpTrack;

/// Audio's REMB contribution is fixed rather than computed from its
/// subscribers (spec.md §4.9).
const AUDIO_REMB_BPS: f32 = 100_000.0;

pub const MIN_BITRATE_AUDIO_BPS: f32 = 20_000.0;
pub const MIN_BITRATE_VIDEO_BPS: f32 = 100_000.0;
pub const MAX_BITRATE_BPS: f32 = 10_000_000.0;

const MIN_CACHE_PACKETS_VIDEO: usize = 128;
const MIN_CACHE_PACKETS_AUDIO: usize = 24;
const MAX_CACHE_PACKETS: usize = 1024;

/// Builds the per-source reception-report block for one UpTrack,
/// resetting its interval stats window in the process (spec.md §5: "RTCP
/// reports reflect a consistent snapshot... single critical section").
pub fn reception_report(track: &UpTrack) -> ReceptionReport {
    let stats = track.cache().lock().unwrap().stats(true);

    let fraction_lost = if stats.expected == 0 {
        0
    } else {
        let lost = stats.expected.saturating_sub(stats.received);
        ((256 * lost) / stats.expected).min(255) as u8
    };
    let total_lost = stats.total_expected.saturating_sub(stats.total_received) as u32;

    let (last_sender_report, delay) = match track.sender_report() {
        Some(sr) => {
            let elapsed = now_jiffies().saturating_sub(sr.jiffies);
            let delay_65536 = ((elapsed as u128 * 65536) / JIFFIES_PER_SEC as u128) as u32;
            (sr.ntp.middle_bits(), delay_65536)
        }
        None => (0, 0),
    };

    ReceptionReport {
        ssrc: track.ssrc,
        fraction_lost,
        total_lost,
        last_sequence_number: stats.extended_last_seqno,
        jitter: track.jitter(),
        last_sender_report,
        delay,
    }
}

/// Composes the ReceiverReport for one upstream peer connection's tracks.
pub fn compose_receiver_report(sender_ssrc: u32, tracks: &[Arc<UpTrack>]) -> ReceiverReport {
    ReceiverReport {
        ssrc: sender_ssrc,
        reports: tracks.iter().map(|t| reception_report(t)).collect(),
        profile_extensions: Default::default(),
    }
}

/// The allowable bitrate this upstream track's video subscribers
/// collectively justify, derived from each subscriber's most recently
/// reported loss-based or REMB-reported allowable rate (spec.md §4.9's
/// "computed from subscribers' allowable bitrates").
fn video_contribution(track: &UpTrack, subscribers: &[Arc<DownTrack>]) -> f32 {
    let min_bps = subscribers
        .iter()
        .filter_map(|d| d.loss_rate().map(|(bps, _)| bps).or(d.remb()))
        .min();

    let Some(min_bps) = min_bps else {
        return MIN_BITRATE_VIDEO_BPS;
    };
    let mut bps = min_bps as f32;

    let any_spatial_active = subscribers.iter().any(|d| d.layer().load().sid > 0);
    if any_spatial_active {
        bps = bps * 5.0 / 4.0;
    }
    let max_temporal = subscribers
        .iter()
        .map(|d| d.layer().load().tid)
        .max()
        .unwrap_or(0);
    for _ in 0..max_temporal {
        bps *= 2.0;
    }

    let _ = track;
    bps.min(MAX_BITRATE_BPS).max(MIN_BITRATE_VIDEO_BPS)
}

/// Composes one REMB packet covering every UpTrack whose codec advertises
/// `goog-remb`, or `None` if none do.
pub fn compose_remb(
    sender_ssrc: u32,
    tracks_and_subscribers: &[(Arc<UpTrack>, Vec<Arc<DownTrack>>)],
) -> Option<ReceiverEstimatedMaximumBitrate> {
    let mut ssrcs = Vec::new();
    let mut total = 0.0f32;

    for (track, subscribers) in tracks_and_subscribers {
        if !track.codec.supports_remb() {
            continue;
        }
        let bps = if track.codec.is_video() {
            if track.rid == "l" {
                MIN_BITRATE_VIDEO_BPS
            } else {
                video_contribution(track, subscribers)
            }
        } else {
            AUDIO_REMB_BPS.max(MIN_BITRATE_AUDIO_BPS)
        };
        ssrcs.push(track.ssrc);
        total += bps;
    }

    if ssrcs.is_empty() {
        return None;
    }

    Some(ReceiverEstimatedMaximumBitrate {
        sender_ssrc,
        bitrate: total.min(MAX_BITRATE_BPS),
        ssrcs,
    })
}

/// Resizes an UpTrack's cache to cover the worst-case retransmission
/// timeout across its subscribers (spec.md §4.9 `updateUpTrack`).
pub fn update_up_track_cache(track: &UpTrack, subscribers: &[Arc<DownTrack>]) {
    let max_rto_jiffies = subscribers
        .iter()
        .map(|d| {
            let rtt = d.rtt_jiffies();
            let jitter = d.receiver_report_stats().map(|(_, j, _)| j).unwrap_or(0);
            let jitter_jiffies =
                (jitter as u128 * JIFFIES_PER_SEC as u128 / track.codec.clock_rate as u128) as u64;
            rtt.saturating_add(jitter_jiffies.saturating_mul(4))
        })
        .max()
        .unwrap_or(0);

    if max_rto_jiffies == 0 {
        return;
    }

    let rate = track.packet_rate();
    let packets = ((rate as u128 * max_rto_jiffies as u128 * 4) / JIFFIES_PER_SEC as u128) as usize;

    let min_for_kind = if track.codec.is_video() {
        MIN_CACHE_PACKETS_VIDEO
    } else {
        MIN_CACHE_PACKETS_AUDIO
    };
    let capacity = packets.clamp(min_for_kind, MAX_CACHE_PACKETS);

    let _ = track.cache().lock().unwrap().resize_cond(capacity);
}

#[cfg(test)]
mod up_generator_test;
