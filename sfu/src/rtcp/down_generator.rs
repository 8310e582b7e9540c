//! 2 Hz RTCP down-path generator: SenderReport + SourceDescription
//! composition per DownTrack (spec.md §4.10).

use rtcp::packet::Packet as RtcpPacket;
use rtcp::sender_report::SenderReport;
use rtcp::source_description::{SdesType, SourceDescription, SourceDescriptionChunk, SourceDescriptionItem};

use crate::down_track::DownTrack;
use crate::time::{now_jiffies, NtpTime, JIFFIES_PER_SEC};

/// Sender reports further than this (in RTP-clock units) from the
/// extrapolated "now" are discarded as implausible rather than sent with
/// a nonsensical timestamp (spec.md §4.10: "ignored if delta is negative
/// or > 1 h").
const MAX_EXTRAPOLATION_SECS: u64 = 3600;

/// Builds this DownTrack's SenderReport, provided an upstream SR has
/// already supplied a {remote NTP, remote RTP} reference tuple. Returns
/// `None` until that's available, or if the extrapolated RTP timestamp
/// would be implausible.
pub fn compose_sender_report(track: &DownTrack, clock_rate: u32) -> Option<SenderReport> {
    let (remote_ntp, remote_rtp) = track.remote_sender_report()?;

    let now = now_jiffies();
    let remote_jiffies = remote_ntp.to_jiffies();
    if now < remote_jiffies {
        return None;
    }
    let delta_jiffies = now - remote_jiffies;
    if delta_jiffies > MAX_EXTRAPOLATION_SECS.saturating_mul(JIFFIES_PER_SEC) {
        return None;
    }

    let delta_clock_units = (delta_jiffies as u128 * clock_rate as u128) / JIFFIES_PER_SEC as u128;
    let now_rtp = remote_rtp.wrapping_add(delta_clock_units as u32);

    let now_ntp = NtpTime::from_jiffies(now);
    track.record_sent_sender_report(now, now_ntp);

    let (octet_count, packet_count) = track.sent_totals();

    Some(SenderReport {
        ssrc: track.ssrc,
        ntp_time: now_ntp.0,
        rtp_time: now_rtp,
        packet_count: packet_count as u32,
        octet_count: octet_count as u32,
        reports: Vec::new(),
        profile_extensions: Default::default(),
    })
}

/// Builds the CNAME chunk for this DownTrack's SourceDescription, if its
/// CNAME has been replicated from the source UpTrack yet.
pub fn compose_source_description(track: &DownTrack) -> Option<SourceDescription> {
    let cname = track.cname()?;
    Some(SourceDescription {
        chunks: vec![SourceDescriptionChunk {
            source: track.ssrc,
            items: vec![SourceDescriptionItem {
                sdes_type: SdesType::SdesCname,
                text: cname.into_bytes().into(),
            }],
        }],
    })
}

/// Composes both packets for one DownTrack's 2 Hz tick, in the order
/// spec.md §4.10 describes ("Emits SenderReport... Follows with
/// SourceDescription CNAME").
pub fn compose_tick(track: &DownTrack, clock_rate: u32) -> Vec<Box<dyn RtcpPacket + Send + Sync>> {
    let mut out: Vec<Box<dyn RtcpPacket + Send + Sync>> = Vec::new();
    if let Some(sr) = compose_sender_report(track, clock_rate) {
        out.push(Box::new(sr));
    }
    if !out.is_empty() {
        if let Some(sdes) = compose_source_description(track) {
            out.push(Box::new(sdes));
        }
    }
    out
}

#[cfg(test)]
mod down_generator_test;
