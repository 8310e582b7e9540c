//! RTCP down-path listener: loss-based rate control, RTT estimation, and
//! PLI/FIR/REMB/NACK ingestion on one DownTrack's feedback channel
//! (spec.md §4.11).

use std::sync::Arc;

use rtcp::packet::Packet as RtcpPacket;
use rtcp::payload_feedbacks::full_intra_request::FullIntraRequest;
use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use rtcp::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;
use rtcp::receiver_report::ReceiverReport;
use rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack;

use crate::down_track::DownTrack;
use crate::time::JIFFIES_PER_SEC;
use crate::up_track::UpTrack;

const INIT_LOSS_RATE_BPS: u64 = 512_000;
const MIN_LOSS_RATE_BPS: u64 = 9_600;
const MAX_LOSS_RATE_BPS: u64 = 1 << 30;

/// Below this loss fraction (over 256), the rate is nudged up, capped at
/// the current ceiling (spec.md §4.11).
const LOW_LOSS_THRESHOLD: u32 = 5;
/// Above this loss fraction, the rate is scaled down proportionally.
const HIGH_LOSS_THRESHOLD: u32 = 25;

/// Applies one ReceiverReport's loss fraction to this DownTrack's
/// loss-based rate estimate, per spec.md §4.11 `updateRate`.
pub fn update_rate(track: &DownTrack, fraction_lost: u8, now_jiffies: u64) {
    let current = match track.loss_rate() {
        Some((bps, stamp)) if (MIN_LOSS_RATE_BPS..=MAX_LOSS_RATE_BPS).contains(&bps) && stamp != 0 => {
            bps
        }
        _ => INIT_LOSS_RATE_BPS,
    };

    let loss = fraction_lost as u32;
    let next = if loss < LOW_LOSS_THRESHOLD {
        let observed_bps = track.byte_rate() * 8;
        if observed_bps >= (current * 3) / 4 {
            (current * 269 / 256).min(MAX_LOSS_RATE_BPS)
        } else {
            current
        }
    } else if loss > HIGH_LOSS_THRESHOLD {
        (current * (512 - loss.min(512)) as u64 / 512).max(MIN_LOSS_RATE_BPS)
    } else {
        current
    };

    track.set_loss_rate(next, now_jiffies);
}

/// Computes RTT from a reception report whose `last_sender_report`
/// matches this DownTrack's most recently emitted SR, folding the sample
/// into the existing EWMA (spec.md §4.11).
fn maybe_update_rtt(track: &DownTrack, report: &rtcp::reception_report::ReceptionReport, now_jiffies: u64) {
    let Some((last_sr_jiffies, last_sr_ntp)) = track.last_sent_sender_report() else {
        return;
    };
    if report.last_sender_report == 0 || report.last_sender_report != last_sr_ntp.middle_bits() {
        return;
    }

    let elapsed_jiffies = now_jiffies.saturating_sub(last_sr_jiffies);
    let delay_jiffies = (report.delay as u128 * JIFFIES_PER_SEC as u128 / 65536) as u64;
    let rtt_jiffies = elapsed_jiffies.saturating_sub(delay_jiffies);

    track.update_rtt(rtt_jiffies);
}

fn handle_receiver_report(track: &Arc<DownTrack>, rr: &ReceiverReport, now_jiffies: u64) {
    for report in &rr.reports {
        if report.ssrc != track.ssrc {
            continue;
        }
        update_rate(track, report.fraction_lost, now_jiffies);
        track.set_receiver_report_stats(report.fraction_lost, report.jitter, now_jiffies);
        maybe_update_rtt(track, report, now_jiffies);
    }
}

async fn handle_transport_layer_nack(
    track: &Arc<DownTrack>,
    up: &Arc<UpTrack>,
    nack: &TransportLayerNack,
) {
    if nack.media_ssrc != track.ssrc {
        return;
    }
    for pair in &nack.nacks {
        let mut seqnos = vec![pair.packet_id];
        for i in 0..16u16 {
            if pair.lost_packets & (1 << i) != 0 {
                seqnos.push(pair.packet_id.wrapping_add(i + 1));
            }
        }

        for out_seqno in seqnos {
            let (known, src_seqno, _pid_delta) = {
                let map = track.packet_map().lock().unwrap();
                map.reverse(out_seqno)
            };
            if !known {
                continue;
            }
            let payload = up.cache().lock().unwrap().get(src_seqno);
            if let Some(payload) = payload {
                if let Err(err) = track.write(&payload).await {
                    log::debug!("down track {} nack retransmit failed: {}", track.ssrc, err);
                }
            }
        }
    }
}

/// Dispatches one batch of RTCP packets received on a DownTrack's
/// feedback channel. `up` is the UpTrack this DownTrack subscribes to,
/// needed for keyframe requests and NACK cache lookups.
pub async fn handle_rtcp(
    track: &Arc<DownTrack>,
    up: &Arc<UpTrack>,
    pkts: &[Box<dyn RtcpPacket + Send + Sync>],
    now_jiffies: u64,
) {
    for pkt in pkts {
        let any = pkt.as_any();
        if let Some(rr) = any.downcast_ref::<ReceiverReport>() {
            handle_receiver_report(track, rr, now_jiffies);
        } else if any.downcast_ref::<PictureLossIndication>().is_some() {
            if let Err(err) = up.request_keyframe().await {
                log::warn!("up track {} pli-triggered keyframe request failed: {}", up.ssrc, err);
            }
        } else if let Some(fir) = any.downcast_ref::<FullIntraRequest>() {
            for entry in &fir.fir {
                if entry.ssrc == track.ssrc && track.fir_seqno_advanced(entry.sequence_number) {
                    if let Err(err) = up.request_keyframe().await {
                        log::warn!("up track {} fir-triggered keyframe request failed: {}", up.ssrc, err);
                    }
                }
            }
        } else if let Some(remb) = any.downcast_ref::<ReceiverEstimatedMaximumBitrate>() {
            track.set_remb(remb.bitrate as u64, now_jiffies);
        } else if let Some(nack) = any.downcast_ref::<TransportLayerNack>() {
            handle_transport_layer_nack(track, up, nack).await;
        }
    }
}

#[cfg(test)]
mod down_listener_test;
