//! Decode/present pipeline
//!
//! ```text
//!  receive loop ──try_send──▶ [decode queue] ──▶ video worker ──▶ [presentation queue] ──▶ renderer
//!        │
//!        └── inline ──▶ audio decoder ──▶ AudioRenderer (continuous playback queue)
//! ```
//!
//! The receive loop never waits on a decoder: a full decode queue drops the
//! frame. Decoded frames not newer than the last presented timestamp are
//! dropped, so presented timestamps strictly increase.

mod audio;
mod queue;
mod video;

pub use queue::FrameQueue;

use parking_lot::Mutex;
use rootstream_core::{AudioFrameDescriptor, PacketType, StreamPacket, VideoFrameDescriptor};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::decoder::{AudioDecoder, AudioRenderer, DecodedFrame, VideoDecoder};
use crate::error::DecodeError;
use audio::AudioPath;
use video::{VideoJob, VideoShared};

/// Queue of frames awaiting presentation
pub type PresentationQueue = FrameQueue<DecodedFrame>;

/// Pipeline tuning
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Frames waiting for the decoder before new ones are dropped
    pub decode_queue_capacity: usize,
    /// Decoded frames waiting for the renderer before the oldest is dropped
    pub presentation_queue_capacity: usize,
    /// Consecutive decode failures that force a new session
    pub failure_threshold: u32,
    /// Initial audio volume in `[0, 1]`
    pub volume: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decode_queue_capacity: 8,
            presentation_queue_capacity: 3,
            failure_threshold: 3,
            volume: 1.0,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct PipelineCounters {
    frames_submitted: AtomicU64,
    dropped_decode_queue_full: AtomicU64,
    frames_decoded: AtomicU64,
    frames_presented: AtomicU64,
    dropped_late: AtomicU64,
    decode_failures: AtomicU64,
    sessions_opened: AtomicU64,
    session_recreations: AtomicU64,
    audio_buffers: AtomicU64,
    audio_silence_buffers: AtomicU64,
    audio_decode_failures: AtomicU64,
}

/// Pipeline counters at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_submitted: u64,
    pub dropped_decode_queue_full: u64,
    pub frames_decoded: u64,
    pub frames_presented: u64,
    pub dropped_late: u64,
    pub dropped_presentation_overflow: u64,
    pub decode_failures: u64,
    pub sessions_opened: u64,
    pub session_recreations: u64,
    pub audio_buffers: u64,
    pub audio_silence_buffers: u64,
    pub audio_decode_failures: u64,
}

struct VideoWorker {
    jobs: mpsc::Sender<VideoJob>,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct DecodePipeline {
    config: PipelineConfig,
    video: Arc<VideoShared>,
    worker: Mutex<Option<VideoWorker>>,
    audio: AudioPath,
    counters: Arc<PipelineCounters>,
}

impl DecodePipeline {
    pub fn new(
        video_decoder: Arc<dyn VideoDecoder>,
        audio_decoder: Arc<dyn AudioDecoder>,
        audio_renderer: Arc<dyn AudioRenderer>,
        config: PipelineConfig,
    ) -> Self {
        let counters = Arc::new(PipelineCounters::default());
        let frames = Arc::new(FrameQueue::new(config.presentation_queue_capacity));
        let video = Arc::new(VideoShared {
            decoder: video_decoder,
            frames,
            counters: counters.clone(),
            last_presented: Mutex::new(None),
            failure_threshold: config.failure_threshold.max(1),
        });
        let audio = AudioPath::new(audio_decoder, audio_renderer, counters.clone(), config.volume);

        Self {
            config,
            video,
            worker: Mutex::new(None),
            audio,
            counters,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Frames ready for presentation
    pub fn frames(&self) -> Arc<PresentationQueue> {
        self.video.frames.clone()
    }

    /// Timestamp of the newest frame handed to the presentation queue
    pub fn last_presented_timestamp(&self) -> Option<u64> {
        *self.video.last_presented.lock()
    }

    pub fn volume(&self) -> f32 {
        self.audio.volume()
    }

    pub fn set_volume(&self, volume: f32) {
        self.audio.set_volume(volume);
    }

    /// Route a media packet to its path
    pub fn submit(&self, packet: &StreamPacket) -> Result<(), DecodeError> {
        match packet.packet_type() {
            PacketType::VideoFrame => self.submit_video(packet),
            PacketType::AudioFrame => self.submit_audio(packet),
            _ => Ok(()),
        }
    }

    /// Queue a video packet for asynchronous decoding. Never blocks.
    pub fn submit_video(&self, packet: &StreamPacket) -> Result<(), DecodeError> {
        let frame = VideoFrameDescriptor::parse(packet.payload())?;
        self.counters.frames_submitted.fetch_add(1, Ordering::Relaxed);

        let job = VideoJob {
            frame,
            timestamp: packet.timestamp(),
        };

        let mut worker = self.worker.lock();
        let worker = worker.get_or_insert_with(|| self.spawn_worker());
        match worker.jobs.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Decode queue full; dropping frame ts={}", packet.timestamp());
                self.counters
                    .dropped_decode_queue_full
                    .fetch_add(1, Ordering::Relaxed);
                Err(DecodeError::Dropped("decode queue full"))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DecodeError::Dropped("decoder stopped")),
        }
    }

    /// Decode an audio packet and schedule it
    pub fn submit_audio(&self, packet: &StreamPacket) -> Result<(), DecodeError> {
        match AudioFrameDescriptor::parse(packet.payload()) {
            Ok(frame) => self.audio.submit(&frame, packet.timestamp()),
            Err(e) => {
                self.audio.schedule_silence(None, packet.timestamp());
                Err(e.into())
            }
        }
    }

    fn spawn_worker(&self) -> VideoWorker {
        let (jobs, jobs_rx) = mpsc::channel(self.config.decode_queue_capacity.max(1));
        let (cancel, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(video::run(self.video.clone(), jobs_rx, cancel_rx));
        debug!("Video decode worker started");
        VideoWorker {
            jobs,
            cancel,
            handle,
        }
    }

    /// Stop decoding and release the decoder session. Idempotent.
    ///
    /// Pending and presented-but-unconsumed frames are discarded. The next
    /// submitted frame starts a fresh session.
    pub async fn reset(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.cancel.send(true);
            drop(worker.jobs);
            if let Err(e) = worker.handle.await {
                debug!("Video worker ended abnormally: {}", e);
            }
            info!("Decode pipeline released");
        }

        let discarded = self.video.frames.clear();
        if discarded > 0 {
            debug!("Discarded {} undisplayed frames", discarded);
        }
        *self.video.last_presented.lock() = None;
        self.audio.reset();
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            frames_submitted: c.frames_submitted.load(Ordering::Relaxed),
            dropped_decode_queue_full: c.dropped_decode_queue_full.load(Ordering::Relaxed),
            frames_decoded: c.frames_decoded.load(Ordering::Relaxed),
            frames_presented: c.frames_presented.load(Ordering::Relaxed),
            dropped_late: c.dropped_late.load(Ordering::Relaxed),
            dropped_presentation_overflow: self.video.frames.dropped(),
            decode_failures: c.decode_failures.load(Ordering::Relaxed),
            sessions_opened: c.sessions_opened.load(Ordering::Relaxed),
            session_recreations: c.session_recreations.load(Ordering::Relaxed),
            audio_buffers: c.audio_buffers.load(Ordering::Relaxed),
            audio_silence_buffers: c.audio_silence_buffers.load(Ordering::Relaxed),
            audio_decode_failures: c.audio_decode_failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            let _ = worker.cancel.send(true);
        }
    }
}
