//! Session configuration and builder

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::context::ClientContext;
use crate::pipeline::PipelineConfig;
use crate::session::TransportSession;

/// Session configuration
///
/// Loadable from the `[session]` table of a TOML file; missing keys take
/// their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seal every message with the session key
    pub encrypt: bool,
    /// Reconnect once after the link is lost
    pub auto_reconnect: bool,
    /// Delay before a reconnect attempt (milliseconds)
    pub reconnect_interval_ms: u64,
    /// Consecutive send failures that drop the link
    pub send_failure_threshold: u32,
    /// Consecutive decode failures that recreate the decoder session
    pub decode_failure_threshold: u32,
    /// Decoded frames held for the renderer
    pub presentation_queue_capacity: usize,
    /// Encoded frames held for the decoder
    pub decode_queue_capacity: usize,
    /// Buffered control packets per subscriber
    pub control_channel_size: usize,
    /// Send an Auth packet carrying the session token after connecting
    pub send_auth_token: bool,
    /// Initial audio volume in `[0, 1]`
    pub volume: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            encrypt: true,
            auto_reconnect: true,
            reconnect_interval_ms: 1000,
            send_failure_threshold: 3,
            decode_failure_threshold: 3,
            presentation_queue_capacity: 3,
            decode_queue_capacity: 8,
            control_channel_size: 64,
            send_auth_token: true,
            volume: 1.0,
        }
    }
}

impl SessionConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            decode_queue_capacity: self.decode_queue_capacity,
            presentation_queue_capacity: self.presentation_queue_capacity,
            failure_threshold: self.decode_failure_threshold,
            volume: self.volume,
        }
    }
}

/// Builder for [`TransportSession`]
#[derive(Debug, Clone, Default)]
pub struct TransportSessionBuilder {
    config: SessionConfig,
}

impl TransportSessionBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable/disable encryption
    pub fn encrypt(mut self, enabled: bool) -> Self {
        self.config.encrypt = enabled;
        self
    }

    /// Enable/disable auto-reconnect
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Set reconnect interval in milliseconds
    pub fn reconnect_interval(mut self, ms: u64) -> Self {
        self.config.reconnect_interval_ms = ms;
        self
    }

    pub fn send_failure_threshold(mut self, failures: u32) -> Self {
        self.config.send_failure_threshold = failures;
        self
    }

    pub fn decode_failure_threshold(mut self, failures: u32) -> Self {
        self.config.decode_failure_threshold = failures;
        self
    }

    pub fn presentation_queue_capacity(mut self, frames: usize) -> Self {
        self.config.presentation_queue_capacity = frames;
        self
    }

    pub fn decode_queue_capacity(mut self, frames: usize) -> Self {
        self.config.decode_queue_capacity = frames;
        self
    }

    pub fn control_channel_size(mut self, size: usize) -> Self {
        self.config.control_channel_size = size;
        self
    }

    pub fn send_auth_token(mut self, enabled: bool) -> Self {
        self.config.send_auth_token = enabled;
        self
    }

    pub fn volume(mut self, volume: f32) -> Self {
        self.config.volume = volume;
        self
    }

    /// Build a disconnected session wired to `ctx`
    pub fn build(self, ctx: &ClientContext) -> TransportSession {
        TransportSession::new(self.config, ctx)
    }
}
