//! Video decode worker
//!
//! One task per pipeline owns the decode session. Frames arrive over a
//! bounded channel; the session is keyed by `(codec, width, height)` and is
//! reopened when that triplet changes or after repeated failures.

use parking_lot::Mutex;
use rootstream_core::{VideoFormat, VideoFrameDescriptor};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{PipelineCounters, PresentationQueue};
use crate::decoder::{DecodedFrame, VideoDecodeSession, VideoDecoder};

pub(crate) struct VideoJob {
    pub frame: VideoFrameDescriptor,
    pub timestamp: u64,
}

/// State shared between the worker and the pipeline handle
pub(crate) struct VideoShared {
    pub decoder: Arc<dyn VideoDecoder>,
    pub frames: Arc<PresentationQueue>,
    pub counters: Arc<PipelineCounters>,
    pub last_presented: Mutex<Option<u64>>,
    pub failure_threshold: u32,
}

impl VideoShared {
    /// Enqueue for presentation unless it is not newer than the last frame
    fn present(&self, frame: DecodedFrame) {
        {
            let mut last = self.last_presented.lock();
            if matches!(*last, Some(ts) if frame.timestamp <= ts) {
                debug!(
                    "Dropping late frame ts={} (last presented {:?})",
                    frame.timestamp, *last
                );
                self.counters.dropped_late.fetch_add(1, Ordering::Relaxed);
                return;
            }
            *last = Some(frame.timestamp);
        }

        self.counters.frames_presented.fetch_add(1, Ordering::Relaxed);
        if self.frames.push(frame).is_some() {
            debug!("Presentation queue full; dropped oldest frame");
        }
    }
}

struct Worker {
    shared: Arc<VideoShared>,
    session: Option<Box<dyn VideoDecodeSession>>,
    consecutive_failures: u32,
}

impl Worker {
    async fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("Closing decode session {}", session.format());
            session.close().await;
        }
    }

    async fn ensure_session(&mut self, format: VideoFormat) -> bool {
        if let Some(session) = &self.session {
            if session.format() == format {
                return true;
            }
            info!("Video format changed {} -> {}", session.format(), format);
            self.close_session().await;
        }

        match self.shared.decoder.open(format).await {
            Ok(session) => {
                info!(
                    "Opened {} decode session for {}",
                    self.shared.decoder.name(),
                    format
                );
                self.shared
                    .counters
                    .sessions_opened
                    .fetch_add(1, Ordering::Relaxed);
                self.session = Some(session);
                true
            }
            Err(e) => {
                warn!("Failed to open decoder for {}: {}", format, e);
                self.shared
                    .counters
                    .decode_failures
                    .fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    async fn handle(&mut self, job: VideoJob, cancel: &mut watch::Receiver<bool>) -> bool {
        if !self.ensure_session(job.frame.format()).await {
            return true;
        }
        let Some(session) = self.session.as_mut() else {
            return true;
        };

        let result = tokio::select! {
            biased;
            _ = cancel.changed() => return false,
            result = session.decode(&job.frame, job.timestamp) => result,
        };

        match result {
            Ok(frame) => {
                self.consecutive_failures = 0;
                self.shared
                    .counters
                    .frames_decoded
                    .fetch_add(1, Ordering::Relaxed);
                self.shared.present(frame);
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.shared
                    .counters
                    .decode_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Decode failed for ts={} ({} consecutive): {}",
                    job.timestamp, self.consecutive_failures, e
                );

                if self.consecutive_failures >= self.shared.failure_threshold {
                    info!("Recreating decode session after {} failures", self.consecutive_failures);
                    self.close_session().await;
                    self.consecutive_failures = 0;
                    self.shared
                        .counters
                        .session_recreations
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        true
    }
}

/// Worker loop. Closes its session exactly once on exit.
pub(crate) async fn run(
    shared: Arc<VideoShared>,
    mut jobs: mpsc::Receiver<VideoJob>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut worker = Worker {
        shared,
        session: None,
        consecutive_failures: 0,
    };

    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.changed() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        if !worker.handle(job, &mut cancel).await {
            break;
        }
    }

    worker.close_session().await;
    debug!("Video decode worker stopped");
}
