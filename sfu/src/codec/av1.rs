//! AV1 inspector (spec.md §4.4).
//!
//! AV1's RTP payload carries no inline picture ID or layer index; layer
//! and keyframe information come from the aggregation header's Z/N/W
//! bits plus walking the OBU stream with
//! [`rtp::codecs::av1::obu::parse_obus`].

use rtp::codecs::av1::obu::{
    obu_type, parse_obus, OBU_TYPE_FRAME, OBU_TYPE_FRAME_HEADER, OBU_TYPE_SEQUENCE_HEADER,
};
use rtp::Error as RtpError;

use super::PacketFlags;

const AV1_KEY_FRAME: u8 = 0;

struct AggregationHeader {
    z: bool,
    n: bool,
    #[allow(dead_code)]
    w: u8,
}

fn parse_aggregation_header(b: u8) -> AggregationHeader {
    AggregationHeader {
        z: b & 0x80 != 0,
        n: b & 0x08 != 0,
        w: (b & 0x30) >> 4,
    }
}

/// `Z` marks a packet that continues a fragmented OBU from the previous
/// packet, so a fresh start requires `Z=0`. `N` marks the first packet of
/// a coded video sequence. A packet is a confident keyframe start only
/// when a sequence header OBU precedes a frame or frame-header OBU whose
/// `frame_type` is `KEY_FRAME` and `show_existing_frame` is clear.
pub fn inspect(payload: &bytes::Bytes) -> Result<PacketFlags, RtpError> {
    if payload.is_empty() {
        return Ok(PacketFlags::default());
    }
    let agg = parse_aggregation_header(payload[0]);
    let start = !agg.z;

    if !start {
        return Ok(PacketFlags {
            start,
            ..Default::default()
        });
    }

    let body = payload.slice(1..);
    let obus = match parse_obus(&body) {
        Ok(o) => o,
        Err(_) => {
            return Ok(PacketFlags {
                start,
                confident: false,
                ..Default::default()
            })
        }
    };

    let mut saw_sequence_header = false;
    let mut keyframe = false;
    let mut confident = false;

    for obu in &obus {
        let t = obu_type(obu.header);
        if t == OBU_TYPE_SEQUENCE_HEADER {
            saw_sequence_header = true;
            continue;
        }
        if t == OBU_TYPE_FRAME || t == OBU_TYPE_FRAME_HEADER {
            if !saw_sequence_header {
                break;
            }
            if obu.payload.is_empty() {
                break;
            }
            let b0 = obu.payload[0];
            let show_existing_frame = (b0 & 0x80) != 0;
            let frame_type = (b0 >> 5) & 0x3;
            confident = true;
            keyframe = !show_existing_frame && frame_type == AV1_KEY_FRAME;
            break;
        }
    }

    Ok(PacketFlags {
        start,
        keyframe,
        confident,
        tid_up_sync: agg.n,
        ..Default::default()
    })
}
