//! Per-codec packet inspection and rewriting (spec.md §4.4).

pub mod av1;
pub mod h264;
pub mod vp8;
pub mod vp9;

/// Flags the inspector extracts from one packet's codec payload.
///
/// `keyframe`/`confident` are the three-valued keyframe signal spec.md
/// §4.4 describes: a reader should only treat a packet as the start of a
/// keyframe when both are true.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags {
    pub start: bool,
    pub keyframe: bool,
    pub confident: bool,
    pub picture_id: Option<u32>,
    pub temporal_id: Option<u8>,
    pub spatial_id: Option<u8>,
    pub tid_up_sync: bool,
    pub sid_sync: bool,
    pub sid_non_reference: bool,
    pub discardable: bool,
    pub end: bool,
}

impl PacketFlags {
    /// `is_keyframe_start` combines `keyframe` and `confident` per
    /// spec.md §4.4: "The reader stores `is_keyframe_start ⇔ (true ∧
    /// confident)`".
    pub fn is_keyframe_start(&self) -> bool {
        self.keyframe && self.confident
    }
}

/// Which per-codec inspector/rewriter a track's packets run through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Vp8,
    Vp9,
    Av1,
    H264,
    Other,
}

/// Holds whatever a codec's rewriter needs beyond `PacketFlags`. Only
/// VP8 rewrites anything beyond the RTP sequence number.
pub enum RewriteContext {
    Vp8(vp8::Vp8Packet),
    None,
}

/// Runs the per-codec inspector over one cached packet's RTP payload
/// (the bytes after the fixed header, CSRCs and extension already
/// stripped by the UpTrack reader). Returns the flags the forwarding
/// path needs plus whatever context the rewriter needs for this codec.
pub fn inspect(kind: CodecKind, rtp_payload: &bytes::Bytes) -> crate::error::Result<(PacketFlags, RewriteContext)> {
    use rtp::codecs::Depacketizer as _;

    match kind {
        CodecKind::Vp8 => {
            let mut pkt = vp8::Vp8Packet::default();
            let frame_payload = pkt.depacketize(rtp_payload)?;
            let flags = vp8::inspect(&pkt, &frame_payload);
            Ok((flags, RewriteContext::Vp8(pkt)))
        }
        CodecKind::Vp9 => {
            let mut pkt = rtp::codecs::vp9::Vp9Packet::default();
            let frame_payload = pkt.depacketize(rtp_payload)?;
            Ok((vp9::inspect(&pkt, &frame_payload), RewriteContext::None))
        }
        CodecKind::Av1 => Ok((av1::inspect(rtp_payload)?, RewriteContext::None)),
        CodecKind::H264 => Ok((h264::inspect(rtp_payload), RewriteContext::None)),
        CodecKind::Other => Ok((PacketFlags::default(), RewriteContext::None)),
    }
}
