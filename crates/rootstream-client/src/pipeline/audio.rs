//! Audio path
//!
//! Audio is decoded inline, in arrival order, and appended to the renderer's
//! playback queue. A frame that fails to decode is replaced by silence of the
//! same length as the last good frame so playback has no gap.

use parking_lot::Mutex;
use rootstream_core::AudioFrameDescriptor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::PipelineCounters;
use crate::decoder::{AudioDecoder, AudioRenderer, PcmBuffer};
use crate::error::DecodeError;

#[derive(Debug, Clone, Copy, Default)]
struct LastFrame {
    sample_rate: u32,
    channels: u8,
    frames: usize,
}

pub(crate) struct AudioPath {
    decoder: Arc<dyn AudioDecoder>,
    renderer: Arc<dyn AudioRenderer>,
    counters: Arc<PipelineCounters>,
    last: Mutex<Option<LastFrame>>,
    /// f32 bits
    volume: AtomicU32,
}

impl AudioPath {
    pub fn new(
        decoder: Arc<dyn AudioDecoder>,
        renderer: Arc<dyn AudioRenderer>,
        counters: Arc<PipelineCounters>,
        volume: f32,
    ) -> Self {
        Self {
            decoder,
            renderer,
            counters,
            last: Mutex::new(None),
            volume: AtomicU32::new(volume.clamp(0.0, 1.0).to_bits()),
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_nan() { 1.0 } else { volume.clamp(0.0, 1.0) };
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    /// Decode and schedule one frame. A decode failure schedules silence and
    /// is reported back.
    pub fn submit(&self, frame: &AudioFrameDescriptor, timestamp: u64) -> Result<(), DecodeError> {
        match self.decoder.decode(frame) {
            Ok(mut samples) => {
                let volume = self.volume();
                if volume < 1.0 {
                    for sample in samples.iter_mut() {
                        *sample *= volume;
                    }
                }

                let buffer = PcmBuffer::new(timestamp, frame.sample_rate, frame.channels, samples);
                *self.last.lock() = Some(LastFrame {
                    sample_rate: frame.sample_rate,
                    channels: frame.channels,
                    frames: buffer.frames(),
                });

                self.counters.audio_buffers.fetch_add(1, Ordering::Relaxed);
                self.renderer.schedule(buffer);
                Ok(())
            }
            Err(e) => {
                warn!("Audio decode failed for ts={}: {}", timestamp, e);
                self.counters
                    .audio_decode_failures
                    .fetch_add(1, Ordering::Relaxed);
                self.schedule_silence(Some(frame), timestamp);
                Err(e)
            }
        }
    }

    /// Fill the gap left by a frame that could not be used
    pub fn schedule_silence(&self, frame: Option<&AudioFrameDescriptor>, timestamp: u64) {
        let last = *self.last.lock();
        let (sample_rate, channels) = match (frame, last) {
            (Some(f), _) if f.sample_rate > 0 && f.channels > 0 => (f.sample_rate, f.channels),
            (_, Some(last)) => (last.sample_rate, last.channels),
            _ => {
                debug!("No audio format known yet; nothing to fill");
                return;
            }
        };

        // Same length as the last good frame, else 10ms
        let frames = match last {
            Some(last) if last.frames > 0 && last.sample_rate == sample_rate => last.frames,
            _ => (sample_rate / 100) as usize,
        };

        if frames == 0 {
            return;
        }

        self.counters
            .audio_silence_buffers
            .fetch_add(1, Ordering::Relaxed);
        self.renderer
            .schedule(PcmBuffer::silence(timestamp, sample_rate, channels, frames));
    }

    pub fn reset(&self) {
        *self.last.lock() = None;
        self.renderer.flush();
    }
}
