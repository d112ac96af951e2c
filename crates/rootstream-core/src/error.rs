//! Error types for RootStream core

use thiserror::Error;

/// Result type alias for packet and descriptor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Reason a buffer was rejected as a stream packet
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidPacket {
    /// Fewer bytes than the fixed 13-byte header
    #[error("buffer too short: {len} bytes (header is 13)")]
    TooShort { len: usize },

    /// Type byte does not map to a known packet type
    #[error("unknown packet type: 0x{0:02x}")]
    UnknownType(u8),
}

/// Protocol errors. Always recoverable: the offending message is dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Packet could not be decoded
    #[error("invalid packet: {0}")]
    InvalidPacket(#[from] InvalidPacket),

    /// Media sub-header truncated
    #[error("invalid {kind} descriptor: need {needed} bytes, have {have}")]
    InvalidDescriptor {
        kind: &'static str,
        needed: usize,
        have: usize,
    },

    /// Input event kind byte not recognised
    #[error("unknown input kind: 0x{0:02x}")]
    UnknownInputKind(u8),
}

impl Error {
    /// True if this error came from the packet header rather than a payload
    pub fn is_packet_error(&self) -> bool {
        matches!(self, Error::InvalidPacket(_))
    }
}

/// Errors from the security session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Sealed message shorter than nonce + tag
    #[error("sealed message too short: {len} bytes (minimum 28)")]
    ShortBuffer { len: usize },

    /// AEAD verification failed
    #[error("authentication tag mismatch")]
    TagMismatch,

    /// No key material: not authenticated or logged out
    #[error("no session key (not authenticated)")]
    NotAuthenticated,

    /// Credentials rejected by the authentication backend
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// AEAD sealing failed
    #[error("encryption failed")]
    EncryptionFailed,
}

impl CryptoError {
    /// Per-message failures that leave the session usable
    pub fn is_per_message(&self) -> bool {
        matches!(self, CryptoError::ShortBuffer { .. } | CryptoError::TagMismatch)
    }
}
