//! Binary packet encoding/decoding
//!
//! RootStream packet format (network byte order):
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ Byte 0:     Packet type                                         │
//! │             0x01 video  0x02 audio  0x03 input                  │
//! │             0x04 control  0x05 keep-alive  0x06 auth            │
//! │ Byte 1-8:   Timestamp (uint64 ms since epoch, producer clock)   │
//! │ Byte 9-12:  Sequence number (uint32, per direction)             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Payload (rest of buffer)                                        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use crate::{InvalidPacket, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Fixed header size
pub const HEADER_SIZE: usize = 13;

/// Packet type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    VideoFrame = 0x01,
    AudioFrame = 0x02,
    InputEvent = 0x03,
    Control = 0x04,
    KeepAlive = 0x05,
    Auth = 0x06,
}

impl PacketType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(PacketType::VideoFrame),
            0x02 => Some(PacketType::AudioFrame),
            0x03 => Some(PacketType::InputEvent),
            0x04 => Some(PacketType::Control),
            0x05 => Some(PacketType::KeepAlive),
            0x06 => Some(PacketType::Auth),
            _ => None,
        }
    }

    /// Video or audio
    pub fn is_media(&self) -> bool {
        matches!(self, PacketType::VideoFrame | PacketType::AudioFrame)
    }
}

/// A RootStream packet. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPacket {
    packet_type: PacketType,
    timestamp: u64,
    sequence: u32,
    payload: Bytes,
}

impl StreamPacket {
    pub fn new(
        packet_type: PacketType,
        timestamp: u64,
        sequence: u32,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            packet_type,
            timestamp,
            sequence,
            payload: payload.into(),
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Producer timestamp in milliseconds since the Unix epoch
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode packet to bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        buf.put_u8(self.packet_type as u8);
        buf.put_u64(self.timestamp);
        buf.put_u32(self.sequence);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Decode packet from bytes. The payload is everything after the header.
    pub fn decode(mut buf: impl Buf) -> Result<Self> {
        if buf.remaining() < HEADER_SIZE {
            return Err(InvalidPacket::TooShort {
                len: buf.remaining(),
            }
            .into());
        }

        let type_byte = buf.get_u8();
        let packet_type =
            PacketType::from_u8(type_byte).ok_or(InvalidPacket::UnknownType(type_byte))?;
        let timestamp = buf.get_u64();
        let sequence = buf.get_u32();
        let payload = buf.copy_to_bytes(buf.remaining());

        Ok(Self {
            packet_type,
            timestamp,
            sequence,
            payload,
        })
    }
}

/// Encode a packet
pub fn encode(packet: &StreamPacket) -> Bytes {
    packet.encode()
}

/// Decode a packet
pub fn decode(buf: impl Buf) -> Result<StreamPacket> {
    StreamPacket::decode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_header_layout() {
        let packet = StreamPacket::new(
            PacketType::VideoFrame,
            0x0102_0304_0506_0708,
            0x0A0B_0C0D,
            Bytes::from_static(b"xy"),
        );
        let encoded = packet.encode();

        assert_eq!(
            &encoded[..],
            &[
                0x01, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x0A, 0x0B, 0x0C, 0x0D,
                b'x', b'y'
            ]
        );
    }

    #[test]
    fn test_empty_payload_is_valid() {
        let encoded = StreamPacket::new(PacketType::KeepAlive, 7, 1, Bytes::new()).encode();
        assert_eq!(encoded.len(), HEADER_SIZE);

        let decoded = StreamPacket::decode(encoded).unwrap();
        assert_eq!(decoded.packet_type(), PacketType::KeepAlive);
        assert!(decoded.payload().is_empty());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut raw = StreamPacket::new(PacketType::Control, 1, 1, Bytes::new())
            .encode()
            .to_vec();
        raw[0] = 0x7F;

        assert_eq!(
            StreamPacket::decode(&raw[..]),
            Err(Error::InvalidPacket(InvalidPacket::UnknownType(0x7F)))
        );
    }

    #[test]
    fn test_is_media() {
        assert!(PacketType::VideoFrame.is_media());
        assert!(PacketType::AudioFrame.is_media());
        assert!(!PacketType::KeepAlive.is_media());
    }
}
