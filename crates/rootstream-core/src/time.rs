//! Timing utilities for RootStream
//!
//! Packet timestamps are milliseconds since the Unix epoch on the producer's
//! clock. Host and client clocks are not synchronised, so latency samples can
//! come out negative and are clamped.

use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamp type (milliseconds since the Unix epoch)
pub type Timestamp = u64;

/// Current wall-clock time in milliseconds. A clock set before 1970 reads 0.
pub fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

/// A one-way latency sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySample {
    /// `now - sent`, never negative
    pub latency_ms: u64,
    /// True if the packet claimed to come from the future
    pub clamped: bool,
}

/// Latency of a packet stamped `sent` and received at `now`
pub fn latency_sample(now: Timestamp, sent: Timestamp) -> LatencySample {
    match now.checked_sub(sent) {
        Some(latency_ms) => LatencySample {
            latency_ms,
            clamped: false,
        },
        None => LatencySample {
            latency_ms: 0,
            clamped: true,
        },
    }
}
