//! Client error types

use crate::state::ConnectionState;
use rootstream_core::VideoCodec;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("not connected")]
    NotConnected,

    /// Another connection attempt or live connection owns the session
    #[error("connect rejected while {0}")]
    ConnectRejected(ConnectionState),

    /// `disconnect()` ran while the connection was being opened
    #[error("connect cancelled")]
    Cancelled,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] rootstream_core::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] rootstream_core::CryptoError),

    #[error("transport error: {0}")]
    Transport(#[from] rootstream_transport::TransportError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("client error: {0}")]
    Other(String),
}

/// Decoder failures. Recovered per frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The codec implementation rejected the input
    #[error("codec failure: {0}")]
    CodecFailure(String),

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(VideoCodec),

    /// Media sub-header could not be parsed
    #[error("invalid media payload: {0}")]
    InvalidPayload(#[from] rootstream_core::Error),

    /// Frame not handed to the decoder (queue full or pipeline stopped)
    #[error("frame dropped: {0}")]
    Dropped(&'static str),
}
