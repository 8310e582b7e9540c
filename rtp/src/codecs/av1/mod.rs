//! AV1 OBU parsing.
//!
//! AV1 carries no forwarder-visible picture ID or layer index in the RTP
//! payload descriptor the way VP8/VP9 do; layer and keyframe information is
//! instead recovered by walking the OBU stream (`obu::parse_obus`) and
//! inspecting sequence/frame header OBU types.

pub mod leb128;
pub mod obu;
