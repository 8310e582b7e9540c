use std::sync::Arc;

use async_trait::async_trait;

use super::*;
use crate::endpoint::RtpWriter;
use crate::error::Result as SfuResult;

struct NullRtpWriter;
#[async_trait]
impl RtpWriter for NullRtpWriter {
    async fn write(&self, _pkt: &rtp::packet::Packet) -> SfuResult<usize> {
        Ok(0)
    }
}

fn new_track() -> Arc<DownTrack> {
    let (mailbox, _rx) = crate::mailbox::Mailbox::new();
    Arc::new(DownTrack::new(42, crate::codec::CodecKind::Vp8, true, Arc::new(NullRtpWriter), mailbox))
}

#[test]
fn test_compose_sender_report_none_without_upstream_sr() {
    let track = new_track();
    assert!(down_generator::compose_sender_report(&track, 90_000).is_none());
}

#[test]
fn test_compose_sender_report_present_after_upstream_sr() {
    let track = new_track();
    let ntp = NtpTime::from_jiffies(crate::time::now_jiffies());
    track.set_remote_sender_report(ntp, 12345);

    let sr = down_generator::compose_sender_report(&track, 90_000).unwrap();
    assert_eq!(sr.ssrc, 42);
    assert!(track.last_sent_sender_report().is_some());
}

#[test]
fn test_compose_source_description_requires_cname() {
    let track = new_track();
    assert!(down_generator::compose_source_description(&track).is_none());
    track.set_cname("alice".to_string());
    let sdes = down_generator::compose_source_description(&track).unwrap();
    assert_eq!(sdes.chunks[0].source, 42);
}

#[test]
fn test_compose_tick_emits_sdes_only_with_sender_report() {
    let track = new_track();
    track.set_cname("alice".to_string());
    // No upstream SR yet: SR is skipped, and since spec.md §4.10 only
    // emits SDES following a SenderReport, the tick is empty.
    assert!(down_generator::compose_tick(&track, 90_000).is_empty());

    let ntp = NtpTime::from_jiffies(crate::time::now_jiffies());
    track.set_remote_sender_report(ntp, 1);
    assert_eq!(down_generator::compose_tick(&track, 90_000).len(), 2);
}
