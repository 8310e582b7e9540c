
use bytes::{Buf, BufMut, Bytes};
use util::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::error::Error;

pub const HEADER_LENGTH: usize = 4;
pub const VERSION_SHIFT: u8 = 6;
pub const VERSION_MASK: u8 = 0x3;
pub const PADDING_SHIFT: u8 = 5;
pub const PADDING_MASK: u8 = 0x1;
pub const EXTENSION_SHIFT: u8 = 4;
pub const EXTENSION_MASK: u8 = 0x1;
pub const EXTENSION_ID_RESERVED: u8 = 0xF;
pub const CC_MASK: u8 = 0xF;
pub const MARKER_SHIFT: u8 = 7;
pub const MARKER_MASK: u8 = 0x1;
pub const PT_MASK: u8 = 0x7F;
pub const SEQ_NUM_OFFSET: usize = 2;
pub const SEQ_NUM_LENGTH: usize = 2;
pub const TIMESTAMP_OFFSET: usize = 4;
pub const TIMESTAMP_LENGTH: usize = 4;
pub const SSRC_OFFSET: usize = 8;
pub const SSRC_LENGTH: usize = 4;
pub const CSRC_OFFSET: usize = 12;
pub const CSRC_LENGTH: usize = 4;

/// ExtensionProfile identifies how header extensions are encoded, per
/// RFC 8285 (one/two byte) or RFC 3550 (opaque).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ExtensionProfile {
    OneByte,
    TwoByte,
    Undefined(u16),
}

impl From<u16> for ExtensionProfile {
    fn from(v: u16) -> Self {
        match v {
            0xBEDE => ExtensionProfile::OneByte,
            0x1000 => ExtensionProfile::TwoByte,
            _ => ExtensionProfile::Undefined(v),
        }
    }
}

impl From<ExtensionProfile> for u16 {
    fn from(v: ExtensionProfile) -> Self {
        match v {
            ExtensionProfile::OneByte => 0xBEDE,
            ExtensionProfile::TwoByte => 0x1000,
            ExtensionProfile::Undefined(v) => v,
        }
    }
}

impl Default for ExtensionProfile {
    fn default() -> Self {
        ExtensionProfile::Undefined(0)
    }
}

/// One header extension element, keyed by its local extension id.
#[derive(Debug, Eq, PartialEq, Default, Clone)]
pub struct Extension {
    pub id: u8,
    pub payload: Bytes,
}

/// Header represents an RTP packet header. `payload_offset` is populated by
/// Marshal/Unmarshal and should not be modified directly.
#[derive(Debug, Eq, PartialEq, Default, Clone)]
pub struct Header {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub extension_profile: ExtensionProfile,
    pub extensions: Vec<Extension>,

    pub payload_offset: usize,
}

impl Header {
    fn extension_payload_len(&self) -> usize {
        match self.extension_profile {
            ExtensionProfile::OneByte => self
                .extensions
                .iter()
                .map(|e| 1 + e.payload.len())
                .sum::<usize>(),
            ExtensionProfile::TwoByte => self
                .extensions
                .iter()
                .map(|e| 2 + e.payload.len())
                .sum::<usize>(),
            ExtensionProfile::Undefined(_) => {
                self.extensions.first().map(|e| e.payload.len()).unwrap_or(0)
            }
        }
    }

    /// Sets (or replaces) the header extension identified by `id`.
    pub fn set_extension(&mut self, id: u8, payload: Bytes) -> Result<(), Error> {
        if self.extension {
            match self.extension_profile {
                ExtensionProfile::OneByte => {
                    if !(1..=14).contains(&id) {
                        return Err(Error::ErrRfc8285oneByteHeaderIdrange);
                    }
                    if payload.len() > 16 {
                        return Err(Error::ErrRfc8285oneByteHeaderSize);
                    }
                }
                ExtensionProfile::TwoByte => {
                    if id < 1 {
                        return Err(Error::ErrRfc8285twoByteHeaderIdrange);
                    }
                    if payload.len() > 255 {
                        return Err(Error::ErrRfc8285twoByteHeaderSize);
                    }
                }
                ExtensionProfile::Undefined(_) => {
                    if id != 0 {
                        return Err(Error::ErrRfc3550headerIdrange);
                    }
                }
            }

            for extension in &mut self.extensions {
                if extension.id == id {
                    extension.payload = payload;
                    return Ok(());
                }
            }
            self.extensions.push(Extension { id, payload });
            return Ok(());
        }

        self.extension = true;
        let len = payload.len();
        self.extension_profile = if len <= 16 {
            ExtensionProfile::OneByte
        } else if len < 256 {
            ExtensionProfile::TwoByte
        } else {
            self.extension_profile
        };
        self.extensions.push(Extension { id, payload });
        Ok(())
    }

    /// Returns the payload bytes of extension `id`, if present.
    pub fn get_extension(&self, id: u8) -> Option<&Bytes> {
        if !self.extension {
            return None;
        }
        self.extensions.iter().find(|e| e.id == id).map(|e| &e.payload)
    }

    /// Returns the ids of every extension carried by this header.
    pub fn get_extension_ids(&self) -> Vec<u8> {
        if !self.extension {
            return vec![];
        }
        self.extensions.iter().map(|e| e.id).collect()
    }

    /// Removes the header extension identified by `id`.
    pub fn del_extension(&mut self, id: u8) -> Result<(), Error> {
        if !self.extension {
            return Err(Error::ErrHeaderExtensionsNotEnabled);
        }
        let before = self.extensions.len();
        self.extensions.retain(|e| e.id != id);
        if self.extensions.len() == before {
            return Err(Error::ErrHeaderExtensionNotFound);
        }
        Ok(())
    }
}

impl MarshalSize for Header {
    fn marshal_size(&self) -> usize {
        let mut head_size = 12 + self.csrc.len() * CSRC_LENGTH;
        if self.extension {
            let payload_len = self.extension_payload_len();
            let padded_len = (payload_len + 3) / 4 * 4;
            head_size += 4 + padded_len;
        }
        head_size
    }
}

impl Marshal for Header {
    fn marshal_to(&self, buf: &mut [u8]) -> util::Result<usize> {
        let size = self.marshal_size();
        if size > buf.len() {
            return Err(Error::ErrBufferTooSmall.into());
        }

        buf[0] = (self.version << VERSION_SHIFT) | self.csrc.len() as u8;
        if self.padding {
            buf[0] |= 1 << PADDING_SHIFT;
        }
        if self.extension {
            buf[0] |= 1 << EXTENSION_SHIFT;
        }

        buf[1] = self.payload_type;
        if self.marker {
            buf[1] |= 1 << MARKER_SHIFT;
        }

        buf[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        let mut offset = 12;
        for csrc in &self.csrc {
            buf[offset..offset + 4].copy_from_slice(&csrc.to_be_bytes());
            offset += 4;
        }

        if self.extension {
            let profile: u16 = self.extension_profile.into();
            buf[offset..offset + 2].copy_from_slice(&profile.to_be_bytes());
            let ext_header_len_pos = offset + 2;
            offset += 4;
            let extensions_start = offset;

            match self.extension_profile {
                ExtensionProfile::OneByte => {
                    for extension in &self.extensions {
                        buf[offset] = (extension.id << 4) | (extension.payload.len() - 1) as u8;
                        offset += 1;
                        buf[offset..offset + extension.payload.len()]
                            .copy_from_slice(&extension.payload);
                        offset += extension.payload.len();
                    }
                }
                ExtensionProfile::TwoByte => {
                    for extension in &self.extensions {
                        buf[offset] = extension.id;
                        offset += 1;
                        buf[offset] = extension.payload.len() as u8;
                        offset += 1;
                        buf[offset..offset + extension.payload.len()]
                            .copy_from_slice(&extension.payload);
                        offset += extension.payload.len();
                    }
                }
                ExtensionProfile::Undefined(_) => {
                    if let Some(ext) = self.extensions.first() {
                        if ext.payload.len() % 4 != 0 {
                            return Err(Error::HeaderExtensionPayloadNot32BitWords.into());
                        }
                        buf[offset..offset + ext.payload.len()].copy_from_slice(&ext.payload);
                        offset += ext.payload.len();
                    }
                }
            }

            let ext_size = offset - extensions_start;
            let padded_size = (ext_size + 3) / 4 * 4;
            buf[ext_header_len_pos..ext_header_len_pos + 2]
                .copy_from_slice(&((padded_size / 4) as u16).to_be_bytes());
            for _ in 0..(padded_size - ext_size) {
                buf[offset] = 0;
                offset += 1;
            }
        }

        Ok(offset)
    }
}

impl Unmarshal for Header {
    fn unmarshal<B>(raw_packet: &mut B) -> util::Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        if raw_packet.remaining() < HEADER_LENGTH {
            return Err(Error::ErrHeaderSizeInsufficient.into());
        }

        let b0 = raw_packet.chunk()[0];
        let b1 = raw_packet.chunk()[1];

        let version = (b0 >> VERSION_SHIFT) & VERSION_MASK;
        let padding = ((b0 >> PADDING_SHIFT) & PADDING_MASK) > 0;
        let extension = ((b0 >> EXTENSION_SHIFT) & EXTENSION_MASK) > 0;
        let cc = (b0 & CC_MASK) as usize;

        let required = CSRC_OFFSET + cc * CSRC_LENGTH;
        if raw_packet.remaining() < required {
            return Err(Error::ErrHeaderSizeInsufficient.into());
        }

        let marker = ((b1 >> MARKER_SHIFT) & MARKER_MASK) > 0;
        let payload_type = b1 & PT_MASK;

        raw_packet.advance(2);
        let sequence_number = raw_packet.get_u16();
        let timestamp = raw_packet.get_u32();
        let ssrc = raw_packet.get_u32();

        let mut csrc = Vec::with_capacity(cc);
        for _ in 0..cc {
            csrc.push(raw_packet.get_u32());
        }

        let mut header = Header {
            version,
            padding,
            extension,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            ..Default::default()
        };

        if extension {
            if raw_packet.remaining() < 4 {
                return Err(Error::ErrHeaderSizeInsufficientForExtension.into());
            }
            let profile = raw_packet.get_u16();
            header.extension_profile = ExtensionProfile::from(profile);
            let extension_len = raw_packet.get_u16() as usize * 4;

            if raw_packet.remaining() < extension_len {
                return Err(Error::ErrHeaderSizeInsufficientForExtension.into());
            }

            match header.extension_profile {
                ExtensionProfile::OneByte => {
                    let mut consumed = 0;
                    while consumed < extension_len {
                        let b = raw_packet.chunk()[0];
                        if b == 0x00 {
                            raw_packet.advance(1);
                            consumed += 1;
                            continue;
                        }
                        let id = b >> 4;
                        let len = (b & 0x0F) as usize + 1;
                        raw_packet.advance(1);
                        consumed += 1;
                        if id == EXTENSION_ID_RESERVED {
                            raw_packet.advance(extension_len - consumed);
                            consumed = extension_len;
                            break;
                        }
                        let payload = raw_packet.copy_to_bytes(len);
                        consumed += len;
                        header.extensions.push(Extension { id, payload });
                    }
                }
                ExtensionProfile::TwoByte => {
                    let mut consumed = 0;
                    while consumed < extension_len {
                        let b = raw_packet.chunk()[0];
                        if b == 0x00 {
                            raw_packet.advance(1);
                            consumed += 1;
                            continue;
                        }
                        let id = raw_packet.get_u8();
                        let len = raw_packet.get_u8() as usize;
                        consumed += 2;
                        let payload = raw_packet.copy_to_bytes(len);
                        consumed += len;
                        header.extensions.push(Extension { id, payload });
                    }
                }
                ExtensionProfile::Undefined(_) => {
                    let payload = raw_packet.copy_to_bytes(extension_len);
                    header.extensions.push(Extension { id: 0, payload });
                }
            }

            header.payload_offset = required + 4 + extension_len;
        } else {
            header.payload_offset = required;
        }

        Ok(header)
    }
}
