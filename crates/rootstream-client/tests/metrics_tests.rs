//! Link metrics tests

use bytes::Bytes;
use rootstream_client::{LinkMetrics, LinkMetricsSample};
use rootstream_core::{PacketType, StreamPacket};
use std::time::{Duration, Instant};

fn packet(packet_type: PacketType, seq: u32, ts: u64, len: usize) -> StreamPacket {
    StreamPacket::new(packet_type, ts, seq, Bytes::from(vec![0u8; len]))
}

#[test]
fn test_loss_percentage_is_zero_before_any_packet() {
    let sample = LinkMetricsSample::default();
    assert_eq!(sample.packets_received, 0);
    assert_eq!(sample.packets_lost, 0);
    assert_eq!(sample.loss_percentage(), 0.0);
}

#[test]
fn test_loss_from_sequence_gaps() {
    let metrics = LinkMetrics::new();
    let now = Instant::now();
    for seq in [1, 2, 3, 7, 8] {
        metrics.record_at(&packet(PacketType::AudioFrame, seq, 1000, 0), 1000, now);
    }

    let sample = metrics.sample();
    assert_eq!(sample.packets_received, 5);
    assert_eq!(sample.packets_lost, 3);
    assert_eq!(sample.loss_percentage(), 3.0 / 8.0 * 100.0);
}

#[test]
fn test_late_arrival_counts_as_reordered() {
    let metrics = LinkMetrics::new();
    let now = Instant::now();
    for seq in [1, 3, 2, 4] {
        metrics.record_at(&packet(PacketType::AudioFrame, seq, 1000, 0), 1000, now);
    }

    let sample = metrics.sample();
    assert_eq!(sample.packets_lost, 1);
    assert_eq!(sample.packets_reordered, 1);
    assert_eq!(sample.packets_received, 4);
}

#[test]
fn test_gap_across_wraparound() {
    let metrics = LinkMetrics::new();
    let now = Instant::now();
    metrics.record_at(&packet(PacketType::AudioFrame, u32::MAX, 1000, 0), 1000, now);
    metrics.record_at(&packet(PacketType::AudioFrame, 1, 1000, 0), 1000, now);

    assert_eq!(metrics.sample().packets_lost, 1);
}

#[test]
fn test_future_timestamp_clamps_to_zero() {
    let metrics = LinkMetrics::new();
    let now = Instant::now();
    metrics.record_at(&packet(PacketType::Control, 1, 5_000, 0), 4_000, now);
    metrics.record_at(&packet(PacketType::Control, 2, 4_990, 0), 5_000, now);

    let sample = metrics.sample();
    assert_eq!(sample.clock_skew_anomalies, 1);
    assert_eq!(sample.latency_ms, 10);
    assert_eq!(sample.rolling_latency_ms, 5.0);
}

#[test]
fn test_fps_and_bitrate_at_window_rollover() {
    let metrics = LinkMetrics::new();
    let start = Instant::now();
    for i in 0..30u32 {
        let at = start + Duration::from_millis(i as u64 * 30);
        // 13-byte header + 112 bytes payload
        metrics.record_at(&packet(PacketType::VideoFrame, i + 1, 1000, 112), 1000, at);
    }
    assert_eq!(metrics.sample().fps, 0.0);

    metrics.tick_at(start + Duration::from_secs(1));
    let sample = metrics.sample();
    assert_eq!(sample.fps, 30.0);
    assert_eq!(sample.bitrate_bps, 30.0 * 125.0 * 8.0);
}

#[test]
fn test_only_video_counts_toward_fps() {
    let metrics = LinkMetrics::new();
    let start = Instant::now();
    metrics.record_at(&packet(PacketType::VideoFrame, 1, 1000, 0), 1000, start);
    metrics.record_at(&packet(PacketType::AudioFrame, 2, 1000, 0), 1000, start);
    metrics.record_at(&packet(PacketType::KeepAlive, 3, 1000, 0), 1000, start);

    metrics.tick_at(start + Duration::from_secs(1));
    assert_eq!(metrics.sample().fps, 1.0);
}

#[test]
fn test_jitter_window_is_bounded() {
    let metrics = LinkMetrics::new();
    let now = Instant::now();
    // An early outlier, then a long steady run
    metrics.record_at(&packet(PacketType::AudioFrame, 1, 0, 0), 500, now);
    for seq in 2..=40 {
        metrics.record_at(&packet(PacketType::AudioFrame, seq, 1000, 0), 1020, now);
    }

    let sample = metrics.sample();
    assert_eq!(sample.rolling_latency_ms, 20.0);
    assert_eq!(sample.jitter, 0.0);
}

#[tokio::test]
async fn test_subscribers_see_each_sample() {
    let metrics = LinkMetrics::new();
    let mut rx = metrics.subscribe();

    metrics.record_at(&packet(PacketType::AudioFrame, 1, 1000, 0), 1025, Instant::now());
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow().latency_ms, 25);

    metrics.reset();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow(), LinkMetricsSample::default());
}
