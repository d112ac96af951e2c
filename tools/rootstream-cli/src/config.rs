//! `rootstream.toml`

use anyhow::{bail, Context, Result};
use rootstream_client::SessionConfig;
use rootstream_core::SymmetricKey;
use rootstream_discovery::DiscoveryConfig;
use rootstream_transport::TcpConfig;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub session: SessionConfig,
    pub transport: TcpConfig,
    pub discovery: DiscoveryConfig,
    pub auth: AuthConfig,
}

/// Credentials and the key shared with the host
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    /// 64 hex characters
    pub shared_key: Option<String>,
}

impl CliConfig {
    /// Load from `path`, or defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }
}

pub fn parse_key(hex: &str) -> Result<SymmetricKey> {
    let hex = hex.trim();
    if hex.len() != 64 {
        bail!("shared key must be 64 hex characters, got {}", hex.len());
    }

    let mut key = [0u8; 32];
    for (i, byte) in key.iter_mut().enumerate() {
        let pair = hex
            .get(i * 2..i * 2 + 2)
            .context("shared key is not ASCII hex")?;
        *byte = u8::from_str_radix(pair, 16)
            .with_context(|| format!("invalid hex {:?} in shared key", pair))?;
    }
    Ok(SymmetricKey::from_bytes(key))
}
