//! The read/write RTP/RTCP primitives an external collaborator (ICE/DTLS/SRTP
//! transport) hands the core, per spec.md §1's non-goals: "a pair of
//! endpoints with 'read RTP/RTCP' and 'write RTP/RTCP' primitives".

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait RtpReader: Send + Sync {
    async fn read(&self, buf: &mut [u8]) -> Result<usize>;
}

#[async_trait]
pub trait RtpWriter: Send + Sync {
    async fn write(&self, pkt: &rtp::packet::Packet) -> Result<usize>;
}

#[async_trait]
pub trait RtcpReader: Send + Sync {
    async fn read(&self, buf: &mut [u8]) -> Result<usize>;
}

#[async_trait]
pub trait RtcpWriter: Send + Sync {
    async fn write(&self, pkts: &[Box<dyn rtcp::packet::Packet + Send + Sync>]) -> Result<usize>;
}
