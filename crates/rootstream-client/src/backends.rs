//! Stock decoder and renderer backends
//!
//! - [`PassthroughVideoDecoder`]: hands the encoded access unit through as the
//!   frame body, for hosts that send raw pictures and for headless clients
//! - [`PcmAudioDecoder`]: uncompressed PCM (s16le or f32le)
//! - [`ChannelAudioRenderer`] / [`NullAudioRenderer`]: playback sinks

use async_trait::async_trait;
use rootstream_core::{AudioFrameDescriptor, VideoCodec, VideoFormat, VideoFrameDescriptor};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::decoder::{
    AudioDecoder, AudioRenderer, DecodedFrame, PcmBuffer, VideoDecodeSession, VideoDecoder,
};
use crate::error::DecodeError;

/// Video "decoder" that forwards encoded data unchanged
#[derive(Debug, Default)]
pub struct PassthroughVideoDecoder;

#[async_trait]
impl VideoDecoder for PassthroughVideoDecoder {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn open(&self, format: VideoFormat) -> Result<Box<dyn VideoDecodeSession>, DecodeError> {
        if let VideoCodec::Other(_) = format.codec {
            return Err(DecodeError::UnsupportedCodec(format.codec));
        }
        debug!("Passthrough session opened for {}", format);
        Ok(Box::new(PassthroughSession { format }))
    }
}

struct PassthroughSession {
    format: VideoFormat,
}

#[async_trait]
impl VideoDecodeSession for PassthroughSession {
    fn format(&self) -> VideoFormat {
        self.format
    }

    async fn decode(
        &mut self,
        frame: &VideoFrameDescriptor,
        timestamp: u64,
    ) -> Result<DecodedFrame, DecodeError> {
        if frame.data.is_empty() {
            return Err(DecodeError::CodecFailure("empty access unit".into()));
        }
        Ok(DecodedFrame {
            timestamp,
            format: frame.format(),
            data: frame.data.clone(),
        })
    }
}

/// Sample layout of uncompressed audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PcmFormat {
    #[default]
    S16le,
    F32le,
}

impl PcmFormat {
    fn sample_size(&self) -> usize {
        match self {
            PcmFormat::S16le => 2,
            PcmFormat::F32le => 4,
        }
    }
}

/// Uncompressed PCM decoder
#[derive(Debug, Default)]
pub struct PcmAudioDecoder {
    format: PcmFormat,
}

impl PcmAudioDecoder {
    pub fn new(format: PcmFormat) -> Self {
        Self { format }
    }
}

impl AudioDecoder for PcmAudioDecoder {
    fn name(&self) -> &str {
        "pcm"
    }

    fn decode(&self, frame: &AudioFrameDescriptor) -> Result<Vec<f32>, DecodeError> {
        if frame.channels == 0 {
            return Err(DecodeError::CodecFailure("zero channels".into()));
        }

        let frame_size = self.format.sample_size() * frame.channels as usize;
        if frame.data.len() % frame_size != 0 {
            return Err(DecodeError::CodecFailure(format!(
                "{} bytes is not a whole number of {}-byte frames",
                frame.data.len(),
                frame_size
            )));
        }

        let samples = match self.format {
            PcmFormat::S16le => frame
                .data
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
                .collect(),
            PcmFormat::F32le => frame
                .data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        };
        Ok(samples)
    }
}

/// Renderer that forwards scheduled buffers to a channel
///
/// The platform audio output drains the receiver in order. Buffers are
/// dropped if the output falls `capacity` buffers behind.
pub struct ChannelAudioRenderer {
    tx: mpsc::Sender<PcmBuffer>,
    dropped: AtomicU64,
}

impl ChannelAudioRenderer {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PcmBuffer>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AudioRenderer for ChannelAudioRenderer {
    fn schedule(&self, buffer: PcmBuffer) {
        if self.tx.try_send(buffer).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Audio output behind; buffer dropped");
        }
    }
}

/// Renderer that discards audio, counting what it was given
#[derive(Debug, Default)]
pub struct NullAudioRenderer {
    buffers: AtomicU64,
    frames: AtomicU64,
}

impl NullAudioRenderer {
    pub fn buffers(&self) -> u64 {
        self.buffers.load(Ordering::Relaxed)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl AudioRenderer for NullAudioRenderer {
    fn schedule(&self, buffer: PcmBuffer) {
        self.buffers.fetch_add(1, Ordering::Relaxed);
        self.frames
            .fetch_add(buffer.frames() as u64, Ordering::Relaxed);
    }
}
