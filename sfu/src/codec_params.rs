//! Per-track codec descriptor handed to the core by the signaling layer
//! (spec.md §3 "UpTrack" identity: "codec descriptor (MIME, clock rate,
//! RTCP-FB capabilities)"), grounded on the webrtc-rs `RTCPFeedback`/
//! `StreamInfo` shape.

use crate::codec::CodecKind;

/// Negotiated RTCP feedback mechanism, mirroring
/// <https://draft.ortc.org/#dom-rtcrtcpfeedback>.
#[derive(Debug, Clone, Default)]
pub struct RtcpFeedback {
    pub typ: String,
    pub parameter: String,
}

#[derive(Debug, Clone)]
pub struct CodecParams {
    pub mime_type: String,
    pub clock_rate: u32,
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl CodecParams {
    pub fn kind(&self) -> CodecKind {
        match self.mime_type.to_ascii_lowercase().as_str() {
            "video/vp8" => CodecKind::Vp8,
            "video/vp9" => CodecKind::Vp9,
            "video/av1" => CodecKind::Av1,
            "video/h264" => CodecKind::H264,
            _ => CodecKind::Other,
        }
    }

    pub fn is_video(&self) -> bool {
        self.mime_type.to_ascii_lowercase().starts_with("video/")
    }

    fn supports(&self, typ: &str, parameter: &str) -> bool {
        self.rtcp_feedback
            .iter()
            .any(|f| f.typ == typ && f.parameter == parameter)
    }

    pub fn supports_nack(&self) -> bool {
        self.supports("nack", "")
    }

    pub fn supports_pli(&self) -> bool {
        self.supports("nack", "pli")
    }

    pub fn supports_fir(&self) -> bool {
        self.supports("ccm", "fir")
    }

    pub fn supports_remb(&self) -> bool {
        self.supports("goog-remb", "")
    }
}
