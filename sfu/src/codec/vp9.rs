//! VP9 inspector (spec.md §4.4). VP9 has no equivalent rewriter: the
//! picture ID carried in its descriptor is not patched on forward, only
//! read for layer selection.

use rtp::codecs::vp9::Vp9Packet;

use super::PacketFlags;

/// `B` marks the start of a frame; `U`/`P` surface as `tid_up_sync` /
/// `sid_sync`; the uncompressed VP9 header's first byte gives
/// `sid_non_reference` (bit 0) and, combined with the profile bits,
/// whether this is a keyframe.
pub fn inspect(vp9: &Vp9Packet, payload: &[u8]) -> PacketFlags {
    let start = vp9.b;
    let confident = start && !payload.is_empty();

    let keyframe = confident && {
        let b0 = payload[0];
        let profile = ((b0 & 0x20) >> 5) | ((b0 & 0x10) >> 3);
        let type_bits_clear = if profile == 3 {
            b0 & 0x6 == 0
        } else {
            b0 & 0xC == 0
        };
        b0 & 0xC0 == 0x80 && type_bits_clear
    };

    PacketFlags {
        start,
        keyframe,
        confident,
        picture_id: if vp9.i { Some(vp9.picture_id as u32) } else { None },
        temporal_id: Some(vp9.tid),
        spatial_id: Some(vp9.sid),
        tid_up_sync: vp9.u,
        sid_sync: vp9.p,
        sid_non_reference: payload.first().is_some_and(|b| b & 0x1 != 0),
        end: vp9.e,
        ..Default::default()
    }
}

#[cfg(test)]
mod vp9_test {
    use rtp::codecs::Depacketizer as _;

    use super::*;

    fn parse(raw: &[u8]) -> (Vp9Packet, bytes::Bytes) {
        let packet = bytes::Bytes::copy_from_slice(raw);
        let mut pkt = Vp9Packet::default();
        let payload = pkt.depacketize(&packet).unwrap();
        (pkt, payload)
    }

    #[test]
    fn test_keyframe_profile0() {
        // B=1 (0x08), I=0,P=0,L=0,F=0,E=0,V=0,Z=0 -> descriptor byte 0x08.
        // Bitstream header byte: frame_marker=10, profile bits=00,
        // show_existing_frame=0, frame_type=0 (key) -> 0x80.
        let (vp9, payload) = parse(&[0x08, 0x80]);
        let flags = inspect(&vp9, &payload);
        assert!(flags.start);
        assert!(flags.keyframe);
    }

    #[test]
    fn test_non_start_not_confident() {
        let (vp9, payload) = parse(&[0x00, 0x80]);
        let flags = inspect(&vp9, &payload);
        assert!(!flags.start);
        assert!(!flags.confident);
        assert!(!flags.keyframe);
    }

    #[test]
    fn test_inter_frame_not_keyframe() {
        // frame_type bit set (interframe): 0x80 | 0x4 (profile0 type bit).
        let (vp9, payload) = parse(&[0x08, 0x84]);
        let flags = inspect(&vp9, &payload);
        assert!(flags.start);
        assert!(!flags.keyframe);
    }
}
