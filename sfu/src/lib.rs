//! Media-plane core of a selective forwarding unit: packet cache,
//! rate/jitter estimation, per-codec inspection and rewriting, seqno and
//! picture-ID remapping, forwarding fan-out and backpressure, and the
//! RTCP control loop (RR/SR/REMB/PLI/FIR/NACK) with simulcast/SVC layer
//! selection. ICE/DTLS/SRTP establishment, SDP negotiation and the
//! signaling protocol are external collaborators; this crate is handed a
//! pair of endpoints with RTP/RTCP read/write primitives.

pub mod cache;
pub mod codec;
pub mod codec_params;
pub mod down_track;
pub mod endpoint;
pub mod error;
pub mod estimator;
pub mod ice_config;
pub mod layer;
pub mod mailbox;
pub mod packet_map;
pub mod rtcp;
pub mod time;
pub mod up_track;
pub mod writer_pool;

pub use error::{Error, Result};
