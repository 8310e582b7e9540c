//! VP8 inspector and in-place rewriter (spec.md §4.4).

use rtp::codecs::vp8::Vp8Packet;

use super::PacketFlags;

/// Builds the flags the cache/forwarding path needs from an already
/// depacketized VP8 payload.
///
/// `start ⇔ S=1 ∧ PID=0` (S and PID are the descriptor's "start of
/// partition" bit and partition index, not the picture ID). Keyframe
/// confidence requires both `start` and the VP8 payload header's first
/// byte having its frame-type bit cleared.
pub fn inspect(vp8: &Vp8Packet, payload: &[u8]) -> PacketFlags {
    let start = vp8.s == 1 && vp8.pid == 0;
    let keyframe = start && payload.first().is_some_and(|b| b & 1 == 0);

    PacketFlags {
        start,
        keyframe,
        confident: start,
        picture_id: if vp8.i == 1 {
            Some(vp8.picture_id as u32)
        } else {
            None
        },
        temporal_id: if vp8.t == 1 { Some(vp8.tid) } else { None },
        ..Default::default()
    }
}

/// Rewrites a forwarded packet's RTP sequence number and, for VP8, its
/// picture ID, in place.
///
/// `header_payload_offset` is the byte offset of the VP8 payload within
/// `buf` (i.e. `rtp::header::Header::marshal_size()` for the packet this
/// payload was parsed from, accounting for CSRCs and any extension).
/// `picture_id_delta` is added modulo the picture ID's width; a delta of
/// zero leaves the picture ID untouched.
pub fn rewrite(
    buf: &mut [u8],
    header_payload_offset: usize,
    vp8: &Vp8Packet,
    new_seqno: u16,
    picture_id_delta: u16,
) {
    buf[2..4].copy_from_slice(&new_seqno.to_be_bytes());

    if vp8.i != 1 || picture_id_delta == 0 {
        return;
    }

    let off = header_payload_offset + vp8.picture_id_offset;
    if vp8.picture_id_is_16bit {
        let new_pid = vp8.picture_id.wrapping_add(picture_id_delta) & 0x7fff;
        buf[off] = 0x80 | ((new_pid >> 8) as u8 & 0x7f);
        buf[off + 1] = (new_pid & 0xff) as u8;
    } else {
        let new_pid = vp8.picture_id.wrapping_add(picture_id_delta) & 0x7f;
        buf[off] = (buf[off] & 0x80) | (new_pid as u8 & 0x7f);
    }
}

#[cfg(test)]
mod vp8_test {
    use bytes::Bytes;
    use rtp::codecs::vp8::Vp8Packet;
    use rtp::codecs::Depacketizer as _;

    use super::*;

    fn s5_packet() -> Vec<u8> {
        vec![
            0x80, 0, 0, 0x2A, 0, 0, 0, 1, 0, 0, 0, 1, // 12-byte RTP header
            0x90, 0x80, 0x80, 0x39, 0, 0, 0, 0, // VP8 descriptor + payload
        ]
    }

    fn parse_vp8(raw_payload: &[u8]) -> (Vp8Packet, Bytes) {
        let packet = Bytes::copy_from_slice(raw_payload);
        let mut pkt = Vp8Packet::default();
        let frame_payload = pkt.depacketize(&packet).unwrap();
        (pkt, frame_payload)
    }

    #[test]
    fn test_s5_inspect_start_and_keyframe() {
        let full = s5_packet();
        let (vp8, frame_payload) = parse_vp8(&full[12..]);
        assert_eq!(vp8.picture_id, 0x39);
        assert!(vp8.picture_id_is_16bit);

        let flags = inspect(&vp8, &frame_payload);
        assert!(flags.start);
        assert!(flags.keyframe);
        assert!(flags.confident);
        assert_eq!(flags.picture_id, Some(0x39));
    }

    #[test]
    fn test_s5_rewrite_scenario() {
        let header_payload_offset = 12;
        for i in 0u16..0x7fff {
            let mut full = s5_packet();
            let (vp8, _) = parse_vp8(&full[header_payload_offset..]);

            rewrite(&mut full, header_payload_offset, &vp8, i, i);

            let seqno = u16::from_be_bytes([full[2], full[3]]);
            assert_eq!(seqno, i);

            let (reparsed, _) = parse_vp8(&full[header_payload_offset..]);
            assert_eq!(reparsed.picture_id, (0x39u16 + i) & 0x7fff);
        }
    }

    #[test]
    fn test_rewrite_zero_delta_leaves_picture_id() {
        let header_payload_offset = 12;
        let mut full = s5_packet();
        let (vp8, _) = parse_vp8(&full[header_payload_offset..]);

        rewrite(&mut full, header_payload_offset, &vp8, 42, 0);

        let (reparsed, _) = parse_vp8(&full[header_payload_offset..]);
        assert_eq!(reparsed.picture_id, 0x39);
    }
}
