//! Decoder and renderer capability traits
//!
//! Platform codecs plug in behind these traits; the stock implementations
//! live in [`crate::backends`].

use async_trait::async_trait;
use bytes::Bytes;
use rootstream_core::{AudioFrameDescriptor, VideoFormat, VideoFrameDescriptor};
use std::time::Duration;

use crate::error::DecodeError;

/// A decoded picture ready for presentation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Producer timestamp of the packet this frame came from (ms)
    pub timestamp: u64,
    pub format: VideoFormat,
    /// Decoded image in the backend's pixel layout
    pub data: Bytes,
}

/// Interleaved f32 PCM scheduled for playback
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    /// Producer timestamp (ms)
    pub timestamp: u64,
    pub sample_rate: u32,
    pub channels: u8,
    pub samples: Vec<f32>,
    /// Filler for a frame that failed to decode
    pub is_silence: bool,
}

impl PcmBuffer {
    pub fn new(timestamp: u64, sample_rate: u32, channels: u8, samples: Vec<f32>) -> Self {
        Self {
            timestamp,
            sample_rate,
            channels,
            samples,
            is_silence: false,
        }
    }

    /// `frames` frames of silence
    pub fn silence(timestamp: u64, sample_rate: u32, channels: u8, frames: usize) -> Self {
        Self {
            timestamp,
            sample_rate,
            channels,
            samples: vec![0.0; frames * channels.max(1) as usize],
            is_silence: true,
        }
    }

    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

/// Opens video decode sessions
#[async_trait]
pub trait VideoDecoder: Send + Sync {
    /// Name of this backend (for logging)
    fn name(&self) -> &str;

    /// Open a session for one `(codec, width, height)` triplet
    async fn open(&self, format: VideoFormat) -> Result<Box<dyn VideoDecodeSession>, DecodeError>;
}

/// A configured video decoder instance
#[async_trait]
pub trait VideoDecodeSession: Send {
    /// The triplet this session was opened for
    fn format(&self) -> VideoFormat;

    /// Decode one access unit
    async fn decode(
        &mut self,
        frame: &VideoFrameDescriptor,
        timestamp: u64,
    ) -> Result<DecodedFrame, DecodeError>;

    /// Release decoder resources. Called exactly once before drop.
    async fn close(&mut self) {}
}

/// Decodes audio frames to interleaved f32 PCM
pub trait AudioDecoder: Send + Sync {
    fn name(&self) -> &str;

    fn decode(&self, frame: &AudioFrameDescriptor) -> Result<Vec<f32>, DecodeError>;
}

/// Continuous playback queue
pub trait AudioRenderer: Send + Sync {
    /// Append a buffer after everything already scheduled
    fn schedule(&self, buffer: PcmBuffer);

    /// Drop anything not yet played
    fn flush(&self) {}
}
