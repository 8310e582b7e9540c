
use std::any::Any;
use std::fmt;

use bytes::{Buf, BufMut, Bytes};
use util::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::error::{Error, Result};
use crate::header::*;
use crate::packet::Packet;

/// RawPacket represents an unparsed RTCP packet. It's returned by unmarshal when
/// a packet with an unknown type or feedback format is encountered.
#[derive(Debug, PartialEq, Eq, Default, Clone)]
pub struct RawPacket(pub Bytes);

impl fmt::Display for RawPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawPacket: {:?}", self.0)
    }
}

impl MarshalSize for RawPacket {
    fn marshal_size(&self) -> usize {
        self.0.len()
    }
}

impl Marshal for RawPacket {
    fn marshal_to(&self, mut buf: &mut [u8]) -> std::result::Result<usize, util::Error> {
        if buf.remaining_mut() < self.0.len() {
            return Err(Error::BufferTooShort.into());
        }
        buf.put_slice(&self.0);
        Ok(self.0.len())
    }
}

impl Unmarshal for RawPacket {
    fn unmarshal<B>(raw_packet: &mut B) -> std::result::Result<Self, util::Error>
    where
        B: Buf,
    {
        if raw_packet.remaining() < HEADER_LENGTH {
            return Err(Error::PacketTooShort.into());
        }

        let raw = raw_packet.copy_to_bytes(raw_packet.remaining());
        Ok(RawPacket(raw))
    }
}

impl Packet for RawPacket {
    fn header(&self) -> Header {
        let mut b = self.0.clone();
        Header::unmarshal(&mut b).unwrap_or_default()
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        vec![]
    }

    fn raw_size(&self) -> usize {
        self.0.len()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn equal(&self, other: &(dyn Packet + Send + Sync)) -> bool {
        other
            .as_any()
            .downcast_ref::<RawPacket>()
            .is_some_and(|a| self == a)
    }

    fn cloned(&self) -> Box<dyn Packet + Send + Sync> {
        Box::new(self.clone())
    }
}
