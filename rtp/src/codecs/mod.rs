//! Per-codec RTP payload parsing.
//!
//! Each module here turns the bytes of one RTP packet's payload into a
//! codec header struct plus the depacketized bitstream slice. The SFU
//! layer uses the header fields (picture id, temporal/spatial layer,
//! start/keyframe bits) to drive forwarding decisions; it never
//! re-packetizes media, so no `Payloader` side lives here.

use bytes::Bytes;

use crate::error::Result;

pub mod av1;
pub mod h264;
pub mod vp8;
pub mod vp9;

/// Turns one RTP payload into the codec's header fields plus the
/// depacketized bitstream bytes.
pub trait Depacketizer {
    fn depacketize(&mut self, b: &Bytes) -> Result<Bytes>;

    /// Checks if the packet is at the beginning of a partition. Should
    /// return false if undeterminable, in which case the caller falls
    /// back to timestamp discontinuities.
    fn is_partition_head(&self, payload: &Bytes) -> bool;

    /// Checks if the packet is at the end of a partition.
    fn is_partition_tail(&self, marker: bool, payload: &Bytes) -> bool;
}
