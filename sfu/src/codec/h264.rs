//! H.264 inspector (spec.md §4.4).
//!
//! Works directly off the raw RTP payload (not the depacketized Annex-B
//! stream `rtp::codecs::h264::H264Packet` produces) since aggregation
//! packets need their individual NAL unit headers, which depacketizing
//! already discards.

use super::PacketFlags;

const NALU_TYPE_MASK: u8 = 0x1F;
const FU_START_BIT: u8 = 0x80;

const STAP_A: u8 = 24;
const STAP_B: u8 = 25;
const MTAP16: u8 = 26;
const MTAP24: u8 = 27;
const FU_A: u8 = 28;
const FU_B: u8 = 29;

fn nal_is_idr(nalu_type: u8) -> bool {
    nalu_type == 5
}

/// Single NAL units (1-23) are always a confident start; type 5 is IDR.
/// Aggregation packets (24-27) are walked for any contained IDR slice.
/// Fragmentation units (28-29) only report confidently on the starting
/// fragment, per the starting bit in the FU header.
pub fn inspect(payload: &[u8]) -> PacketFlags {
    if payload.is_empty() {
        return PacketFlags::default();
    }

    let nalu_type = payload[0] & NALU_TYPE_MASK;

    match nalu_type {
        1..=23 => PacketFlags {
            start: true,
            confident: true,
            keyframe: nal_is_idr(nalu_type),
            ..Default::default()
        },
        STAP_A => aggregation(payload, 1),
        STAP_B => aggregation(payload, 3),
        MTAP16 => mtap(payload, 2),
        MTAP24 => mtap(payload, 3),
        FU_A | FU_B => {
            let header_len = if nalu_type == FU_A { 2 } else { 4 };
            if payload.len() < header_len {
                return PacketFlags::default();
            }
            let fu_header = payload[1];
            let start = fu_header & FU_START_BIT != 0;
            let frag_type = fu_header & NALU_TYPE_MASK;
            PacketFlags {
                start,
                confident: start,
                keyframe: start && nal_is_idr(frag_type),
                ..Default::default()
            }
        }
        _ => PacketFlags::default(),
    }
}

/// Walks a STAP-A/STAP-B list of 16-bit length-prefixed NAL units
/// starting at `offset` (1 for STAP-A, 3 for STAP-B to skip the DON).
fn aggregation(payload: &[u8], offset: usize) -> PacketFlags {
    let mut keyframe = false;
    let mut i = offset;
    while i + 2 <= payload.len() {
        let len = u16::from_be_bytes([payload[i], payload[i + 1]]) as usize;
        i += 2;
        if i >= payload.len() {
            break;
        }
        if nal_is_idr(payload[i] & NALU_TYPE_MASK) {
            keyframe = true;
        }
        i += len;
    }
    PacketFlags {
        start: true,
        confident: true,
        keyframe,
        ..Default::default()
    }
}

/// Walks an MTAP16/MTAP24 list: 16-bit length, 1-byte DOND, then a
/// 2- or 3-byte timestamp offset (`ts_len`), then the NAL unit.
fn mtap(payload: &[u8], ts_len: usize) -> PacketFlags {
    let mut keyframe = false;
    let mut i = 3; // header + 2-byte DON base
    while i + 2 <= payload.len() {
        let len = u16::from_be_bytes([payload[i], payload[i + 1]]) as usize;
        i += 2;
        let nal_off = i + 1 + ts_len;
        if nal_off >= payload.len() {
            break;
        }
        if nal_is_idr(payload[nal_off] & NALU_TYPE_MASK) {
            keyframe = true;
        }
        i += len;
    }
    PacketFlags {
        start: true,
        confident: true,
        keyframe,
        ..Default::default()
    }
}

#[cfg(test)]
mod h264_test {
    use super::*;

    #[test]
    fn test_single_nal_idr() {
        let flags = inspect(&[0x65, 0, 0, 0]);
        assert!(flags.start);
        assert!(flags.confident);
        assert!(flags.keyframe);
    }

    #[test]
    fn test_single_nal_non_idr() {
        let flags = inspect(&[0x61, 0, 0, 0]);
        assert!(flags.start);
        assert!(!flags.keyframe);
    }

    #[test]
    fn test_fu_a_start_fragment_idr() {
        // FU indicator nal_type=28, FU header S=1, type=5 (IDR).
        let flags = inspect(&[0x7C, 0x85, 0, 0]);
        assert!(flags.start);
        assert!(flags.confident);
        assert!(flags.keyframe);
    }

    #[test]
    fn test_fu_a_continuation_not_confident() {
        let flags = inspect(&[0x7C, 0x05, 0, 0]);
        assert!(!flags.start);
        assert!(!flags.confident);
    }

    #[test]
    fn test_stap_a_with_idr() {
        let mut payload = vec![STAP_A];
        payload.extend_from_slice(&[0, 1, 0x65]); // len=1, IDR nal
        let flags = inspect(&payload);
        assert!(flags.keyframe);
    }

    #[test]
    fn test_stap_a_without_idr() {
        let mut payload = vec![STAP_A];
        payload.extend_from_slice(&[0, 1, 0x61]); // len=1, non-IDR nal
        let flags = inspect(&payload);
        assert!(!flags.keyframe);
    }
}
