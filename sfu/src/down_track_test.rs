use async_trait::async_trait;
use bytes::Bytes;
use util::marshal::Marshal;

use super::*;
use crate::mailbox::Mailbox;

struct NullRtpWriter;
#[async_trait]
impl RtpWriter for NullRtpWriter {
    async fn write(&self, _pkt: &rtp::packet::Packet) -> Result<usize> {
        Ok(0)
    }
}

/// A VP9 frame-start packet at spatial layer `sid`, not a keyframe.
fn vp9_rtp_packet(seqno: u16, ts: u32, sid: u8) -> Bytes {
    let header = rtp::header::Header {
        version: 2,
        payload_type: 98,
        sequence_number: seqno,
        timestamp: ts,
        ssrc: 0xFEED,
        ..Default::default()
    };
    // Descriptor: L=1 F=1 B=1 (flexible mode, frame start) -> 0x38.
    // Layer byte: T=0 U=0 S=sid D=0.
    // Payload byte 0 cleared so the keyframe check's `b0 & 0xC0 == 0x80`
    // term is false: not a keyframe regardless of the rest.
    let payload = Bytes::from(vec![0x38, sid << 1, 0x00, 0x00]);
    let packet = rtp::packet::Packet { header, payload };
    packet.marshal().unwrap()
}

#[tokio::test]
async fn test_spatial_layer_mismatch_at_frame_start_requests_keyframe() {
    let (mailbox, mut rx) = Mailbox::new();
    let down = Arc::new(DownTrack::new(
        1,
        CodecKind::Vp9,
        true,
        Arc::new(NullRtpWriter),
        mailbox,
    ));
    // Pin the subscriber to the base layer so a higher-sid packet can't
    // be absorbed by the auto-bump in AtomicLayerState::on_packet.
    down.layer().limit_to_lowest_spatial();

    let raw = vp9_rtp_packet(10, 1000, 1);
    down.write(&raw).await.unwrap();

    let action = rx.try_recv().expect("expected a RequestKeyframe action");
    assert!(matches!(action, TrackAction::RequestKeyframe));
}

#[tokio::test]
async fn test_matching_spatial_layer_does_not_request_keyframe() {
    let (mailbox, mut rx) = Mailbox::new();
    let down = Arc::new(DownTrack::new(
        1,
        CodecKind::Vp9,
        true,
        Arc::new(NullRtpWriter),
        mailbox,
    ));

    let raw = vp9_rtp_packet(10, 1000, 0);
    down.write(&raw).await.unwrap();

    assert!(rx.try_recv().is_err(), "sid already matches wanted_sid, no request expected");
}
