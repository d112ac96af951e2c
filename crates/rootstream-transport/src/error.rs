//! Transport error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("bind failed: {0}")]
    BindFailed(String),

    #[error("accept failed: {0}")]
    AcceptFailed(String),

    #[error("message too large: {len} > {max}")]
    MessageTooLarge { len: usize, max: usize },

    #[error("send buffer full")]
    BufferFull,

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether the link is gone, as opposed to a single message failing
    pub fn is_link_failure(&self) -> bool {
        !matches!(
            self,
            TransportError::BufferFull | TransportError::MessageTooLarge { .. }
        )
    }
}
