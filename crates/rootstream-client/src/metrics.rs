//! Link-quality metrics
//!
//! Every received packet feeds [`LinkMetrics`]:
//! - fps and bitrate over a rolling one-second window
//! - one-way latency from the producer timestamp, instantaneous and rolling
//! - jitter as the variance of the recent latency samples
//! - loss from gaps in the sequence space, tolerating wraparound
//!
//! Counters only grow within a session; [`LinkMetrics::reset`] starts a new one.

use parking_lot::Mutex;
use rootstream_core::time::{self, latency_sample};
use rootstream_core::{PacketType, StreamPacket};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Window over which fps and bitrate are computed
pub const WINDOW: Duration = Duration::from_secs(1);

/// Latency samples kept for the rolling aggregate and jitter
pub const LATENCY_SAMPLES: usize = 32;

/// A consistent view of the link metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkMetricsSample {
    /// Video frames per second over the last completed window
    pub fps: f64,
    /// Received bits per second over the last completed window
    pub bitrate_bps: f64,
    /// Most recent latency sample (ms)
    pub latency_ms: u64,
    /// Mean of the recent latency samples (ms)
    pub rolling_latency_ms: f64,
    /// Variance of the recent latency samples (ms²)
    pub jitter: f64,
    pub packets_received: u64,
    pub packets_lost: u64,
    /// Late or duplicate arrivals
    pub packets_reordered: u64,
    /// Packets stamped ahead of the local clock
    pub clock_skew_anomalies: u64,
}

impl LinkMetricsSample {
    /// `lost / (received + lost) * 100`, or 0 before any packet
    pub fn loss_percentage(&self) -> f64 {
        let total = self.packets_received + self.packets_lost;
        if total == 0 {
            return 0.0;
        }
        self.packets_lost as f64 / total as f64 * 100.0
    }

    /// Jitter expressed as a standard deviation (ms)
    pub fn jitter_stddev_ms(&self) -> f64 {
        self.jitter.sqrt()
    }
}

#[derive(Debug)]
struct MetricsState {
    sample: LinkMetricsSample,
    window_start: Option<Instant>,
    window_frames: u64,
    window_bytes: u64,
    expected_sequence: Option<u32>,
    latencies: VecDeque<u64>,
}

impl MetricsState {
    fn new() -> Self {
        Self {
            sample: LinkMetricsSample::default(),
            window_start: None,
            window_frames: 0,
            window_bytes: 0,
            expected_sequence: None,
            latencies: VecDeque::with_capacity(LATENCY_SAMPLES),
        }
    }

    /// True if a window closed
    fn roll_window(&mut self, now: Instant) -> bool {
        let Some(start) = self.window_start else {
            return false;
        };
        let elapsed = now.saturating_duration_since(start);
        if elapsed < WINDOW {
            return false;
        }

        let secs = elapsed.as_secs_f64();
        self.sample.fps = self.window_frames as f64 / secs;
        self.sample.bitrate_bps = (self.window_bytes * 8) as f64 / secs;
        self.window_frames = 0;
        self.window_bytes = 0;
        self.window_start = Some(now);
        true
    }

    fn track_sequence(&mut self, sequence: u32) {
        let Some(expected) = self.expected_sequence else {
            self.expected_sequence = Some(sequence.wrapping_add(1));
            return;
        };

        // Signed distance in sequence space handles wraparound
        let distance = sequence.wrapping_sub(expected) as i32;
        if distance >= 0 {
            if distance > 0 {
                debug!("Sequence gap: expected {}, got {}", expected, sequence);
                self.sample.packets_lost += distance as u64;
            }
            self.expected_sequence = Some(sequence.wrapping_add(1));
        } else {
            debug!("Late packet: seq {} (expected {})", sequence, expected);
            self.sample.packets_reordered += 1;
        }
    }

    fn track_latency(&mut self, now_ms: u64, timestamp: u64) {
        let latency = latency_sample(now_ms, timestamp);
        if latency.clamped {
            self.sample.clock_skew_anomalies += 1;
            if self.sample.clock_skew_anomalies == 1 {
                warn!(
                    "Clock skew: packet stamped {}ms ahead of local clock",
                    timestamp - now_ms
                );
            } else {
                debug!("Clock skew anomaly #{}", self.sample.clock_skew_anomalies);
            }
        }

        self.sample.latency_ms = latency.latency_ms;
        if self.latencies.len() == LATENCY_SAMPLES {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency.latency_ms);

        let n = self.latencies.len() as f64;
        let mean = self.latencies.iter().sum::<u64>() as f64 / n;
        let variance = self
            .latencies
            .iter()
            .map(|&l| {
                let d = l as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;

        self.sample.rolling_latency_ms = mean;
        self.sample.jitter = variance;
    }
}

/// Rolling link metrics for one session
pub struct LinkMetrics {
    state: Mutex<MetricsState>,
    tx: watch::Sender<LinkMetricsSample>,
}

impl LinkMetrics {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LinkMetricsSample::default());
        Self {
            state: Mutex::new(MetricsState::new()),
            tx,
        }
    }

    /// Record a packet received now
    pub fn record(&self, packet: &StreamPacket) {
        self.record_at(packet, time::now_ms(), Instant::now());
    }

    /// Record a packet received at `now_ms` (wall clock) / `now` (monotonic)
    pub fn record_at(&self, packet: &StreamPacket, now_ms: u64, now: Instant) {
        let sample = {
            let mut state = self.state.lock();
            state.roll_window(now);
            if state.window_start.is_none() {
                state.window_start = Some(now);
            }

            state.sample.packets_received += 1;
            state.window_bytes += packet.size() as u64;
            if packet.packet_type() == PacketType::VideoFrame {
                state.window_frames += 1;
            }

            state.track_sequence(packet.sequence());
            state.track_latency(now_ms, packet.timestamp());
            state.sample.clone()
        };
        self.tx.send_replace(sample);
    }

    /// Close the window if it has elapsed, without a new packet
    pub fn tick_at(&self, now: Instant) {
        let sample = {
            let mut state = self.state.lock();
            if !state.roll_window(now) {
                return;
            }
            state.sample.clone()
        };
        self.tx.send_replace(sample);
    }

    /// Current metrics
    pub fn sample(&self) -> LinkMetricsSample {
        self.state.lock().sample.clone()
    }

    /// Watch metrics; a new value is published per received packet
    pub fn subscribe(&self) -> watch::Receiver<LinkMetricsSample> {
        self.tx.subscribe()
    }

    /// A new link within the same session: the host restarts its sequence
    /// space, counters carry on
    pub fn new_link(&self) {
        self.state.lock().expected_sequence = None;
    }

    /// Start a new session
    pub fn reset(&self) {
        *self.state.lock() = MetricsState::new();
        self.tx.send_replace(LinkMetricsSample::default());
    }
}

impl Default for LinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn packet(packet_type: PacketType, seq: u32, ts: u64) -> StreamPacket {
        StreamPacket::new(packet_type, ts, seq, Bytes::new())
    }

    #[test]
    fn test_loss_zero_without_packets() {
        let metrics = LinkMetrics::new();
        assert_eq!(metrics.sample().loss_percentage(), 0.0);
    }

    #[test]
    fn test_sequence_wraparound_is_not_loss() {
        let metrics = LinkMetrics::new();
        let now = Instant::now();
        for seq in [u32::MAX - 1, u32::MAX, 0, 1] {
            metrics.record_at(&packet(PacketType::AudioFrame, seq, 100), 100, now);
        }
        let sample = metrics.sample();
        assert_eq!(sample.packets_lost, 0);
        assert_eq!(sample.packets_reordered, 0);
    }

    #[test]
    fn test_latency_variance() {
        let metrics = LinkMetrics::new();
        let now = Instant::now();
        metrics.record_at(&packet(PacketType::AudioFrame, 1, 990), 1000, now);
        metrics.record_at(&packet(PacketType::AudioFrame, 2, 1970), 2000, now);

        let sample = metrics.sample();
        assert_eq!(sample.latency_ms, 30);
        assert_eq!(sample.rolling_latency_ms, 20.0);
        assert_eq!(sample.jitter, 100.0);
        assert_eq!(sample.jitter_stddev_ms(), 10.0);
    }

    #[test]
    fn test_new_link_restarts_sequence_tracking() {
        let metrics = LinkMetrics::new();
        let now = Instant::now();
        for seq in [1, 2, 4] {
            metrics.record_at(&packet(PacketType::AudioFrame, seq, 100), 100, now);
        }

        metrics.new_link();
        for seq in [1, 2, 3] {
            metrics.record_at(&packet(PacketType::AudioFrame, seq, 100), 100, now);
        }
        metrics.record_at(&packet(PacketType::AudioFrame, 6, 100), 100, now);

        let sample = metrics.sample();
        assert_eq!(sample.packets_received, 7);
        assert_eq!(sample.packets_lost, 3);
        assert_eq!(sample.packets_reordered, 0);
    }
}
