//! Media sub-headers carried inside packet payloads
//!
//! Video payload:
//! ```text
//! [codec: 1][width: 2][height: 2][encoded frame: rest]
//! ```
//! Audio payload:
//! ```text
//! [sample rate: 4][channels: 1][encoded audio: rest]
//! ```
//! Input payload:
//! ```text
//! [kind: 1][event data: rest]
//! ```

use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

const VIDEO_HEADER_SIZE: usize = 5;
const AUDIO_HEADER_SIZE: usize = 5;

/// Video codec tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    H264,
    Hevc,
    Vp9,
    /// Tag this client has no name for; kept so the decoder can decide
    Other(u8),
}

impl VideoCodec {
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            0x01 => VideoCodec::H264,
            0x02 => VideoCodec::Hevc,
            0x03 => VideoCodec::Vp9,
            other => VideoCodec::Other(other),
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            VideoCodec::H264 => 0x01,
            VideoCodec::Hevc => 0x02,
            VideoCodec::Vp9 => 0x03,
            VideoCodec::Other(tag) => *tag,
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "h264"),
            VideoCodec::Hevc => write!(f, "hevc"),
            VideoCodec::Vp9 => write!(f, "vp9"),
            VideoCodec::Other(tag) => write!(f, "codec-0x{:02x}", tag),
        }
    }
}

/// The `(codec, width, height)` triplet a decoder session is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoFormat {
    pub codec: VideoCodec,
    pub width: u16,
    pub height: u16,
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}", self.codec, self.width, self.height)
    }
}

/// Parsed VideoFrame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrameDescriptor {
    pub codec: VideoCodec,
    pub width: u16,
    pub height: u16,
    pub data: Bytes,
}

impl VideoFrameDescriptor {
    pub fn new(codec: VideoCodec, width: u16, height: u16, data: impl Into<Bytes>) -> Self {
        Self {
            codec,
            width,
            height,
            data: data.into(),
        }
    }

    pub fn format(&self) -> VideoFormat {
        VideoFormat {
            codec: self.codec,
            width: self.width,
            height: self.height,
        }
    }

    pub fn parse(payload: &Bytes) -> Result<Self> {
        if payload.len() < VIDEO_HEADER_SIZE {
            return Err(Error::InvalidDescriptor {
                kind: "video",
                needed: VIDEO_HEADER_SIZE,
                have: payload.len(),
            });
        }

        let mut buf = payload.clone();
        let codec = VideoCodec::from_tag(buf.get_u8());
        let width = buf.get_u16();
        let height = buf.get_u16();

        Ok(Self {
            codec,
            width,
            height,
            data: buf,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(VIDEO_HEADER_SIZE + self.data.len());
        buf.put_u8(self.codec.tag());
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.extend_from_slice(&self.data);
        buf.freeze()
    }
}

/// Parsed AudioFrame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrameDescriptor {
    pub sample_rate: u32,
    pub channels: u8,
    pub data: Bytes,
}

impl AudioFrameDescriptor {
    pub fn new(sample_rate: u32, channels: u8, data: impl Into<Bytes>) -> Self {
        Self {
            sample_rate,
            channels,
            data: data.into(),
        }
    }

    pub fn parse(payload: &Bytes) -> Result<Self> {
        if payload.len() < AUDIO_HEADER_SIZE {
            return Err(Error::InvalidDescriptor {
                kind: "audio",
                needed: AUDIO_HEADER_SIZE,
                have: payload.len(),
            });
        }

        let mut buf = payload.clone();
        let sample_rate = buf.get_u32();
        let channels = buf.get_u8();

        Ok(Self {
            sample_rate,
            channels,
            data: buf,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(AUDIO_HEADER_SIZE + self.data.len());
        buf.put_u32(self.sample_rate);
        buf.put_u8(self.channels);
        buf.extend_from_slice(&self.data);
        buf.freeze()
    }
}

/// Input event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InputKind {
    KeyPress = 0x01,
    KeyRelease = 0x02,
    MouseMove = 0x03,
    MouseButton = 0x04,
    GamepadButton = 0x05,
    GamepadAxis = 0x06,
    Touch = 0x07,
}

impl InputKind {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(InputKind::KeyPress),
            0x02 => Some(InputKind::KeyRelease),
            0x03 => Some(InputKind::MouseMove),
            0x04 => Some(InputKind::MouseButton),
            0x05 => Some(InputKind::GamepadButton),
            0x06 => Some(InputKind::GamepadAxis),
            0x07 => Some(InputKind::Touch),
            _ => None,
        }
    }
}

/// An input event relayed to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: InputKind,
    pub data: Bytes,
}

impl InputEvent {
    pub fn new(kind: InputKind, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    /// Key down/up for a platform key code
    pub fn key(code: u32, pressed: bool) -> Self {
        let kind = if pressed {
            InputKind::KeyPress
        } else {
            InputKind::KeyRelease
        };
        Self::new(kind, Bytes::copy_from_slice(&code.to_be_bytes()))
    }

    /// Relative mouse motion
    pub fn mouse_move(dx: i16, dy: i16) -> Self {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_i16(dx);
        buf.put_i16(dy);
        Self::new(InputKind::MouseMove, buf.freeze())
    }

    /// Gamepad axis position in `[-1.0, 1.0]`, quantised to i16
    pub fn gamepad_axis(axis: u8, value: f32) -> Self {
        let scaled = (value.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        let mut buf = BytesMut::with_capacity(3);
        buf.put_u8(axis);
        buf.put_i16(scaled);
        Self::new(InputKind::GamepadAxis, buf.freeze())
    }

    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.data.len());
        buf.put_u8(self.kind as u8);
        buf.extend_from_slice(&self.data);
        buf.freeze()
    }

    pub fn from_payload(payload: &Bytes) -> Result<Self> {
        let mut buf = payload.clone();
        if !buf.has_remaining() {
            return Err(Error::InvalidDescriptor {
                kind: "input",
                needed: 1,
                have: 0,
            });
        }
        let byte = buf.get_u8();
        let kind = InputKind::from_u8(byte).ok_or(Error::UnknownInputKind(byte))?;
        Ok(Self { kind, data: buf })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_descriptor_layout() {
        let payload = Bytes::from_static(&[0x02, 0x07, 0x80, 0x04, 0x38, 0xAA, 0xBB]);
        let desc = VideoFrameDescriptor::parse(&payload).unwrap();

        assert_eq!(desc.codec, VideoCodec::Hevc);
        assert_eq!(desc.width, 1920);
        assert_eq!(desc.height, 1080);
        assert_eq!(desc.data.as_ref(), &[0xAA, 0xBB]);
        assert_eq!(desc.encode(), payload);
    }

    #[test]
    fn test_unknown_codec_tag_preserved() {
        let desc = VideoFrameDescriptor::new(VideoCodec::from_tag(0x09), 64, 64, Bytes::new());
        let parsed = VideoFrameDescriptor::parse(&desc.encode()).unwrap();
        assert_eq!(parsed.codec, VideoCodec::Other(0x09));
        assert_eq!(parsed.codec.tag(), 0x09);
    }

    #[test]
    fn test_truncated_video_descriptor() {
        let err = VideoFrameDescriptor::parse(&Bytes::from_static(&[0x01, 0x00])).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidDescriptor {
                kind: "video",
                needed: 5,
                have: 2
            }
        );
    }

    #[test]
    fn test_audio_descriptor_layout() {
        let desc = AudioFrameDescriptor::new(48_000, 2, Bytes::from_static(b"opus"));
        let encoded = desc.encode();
        assert_eq!(&encoded[..5], &[0x00, 0x00, 0xBB, 0x80, 0x02]);
        assert_eq!(AudioFrameDescriptor::parse(&encoded).unwrap(), desc);
    }

    #[test]
    fn test_input_payload() {
        let event = InputEvent::key(0x41, true);
        let payload = event.to_payload();
        assert_eq!(&payload[..], &[0x01, 0x00, 0x00, 0x00, 0x41]);
        assert_eq!(InputEvent::from_payload(&payload).unwrap(), event);

        assert_eq!(
            InputEvent::from_payload(&Bytes::from_static(&[0x55])),
            Err(Error::UnknownInputKind(0x55))
        );
    }

    #[test]
    fn test_gamepad_axis_clamped() {
        let event = InputEvent::gamepad_axis(1, 4.0);
        assert_eq!(&event.data[..], &[0x01, 0x7F, 0xFF]);
    }
}
