//! RootStream Transport Layer
//!
//! This crate provides the stream transports a RootStream client talks over:
//! - TCP with 4-byte length-prefixed framing (primary)
//! - A [`Connector`] seam so the client can run over any transport

pub mod error;
pub mod traits;

#[cfg(feature = "tcp")]
pub mod tcp;

pub use error::{Result, TransportError};
pub use traits::{
    BoxedReceiver, Connector, SharedSender, TransportEvent, TransportReceiver, TransportSender,
    TransportServer,
};

#[cfg(feature = "tcp")]
pub use tcp::{TcpConfig, TcpConnector, TcpReceiver, TcpSender, TcpServer, TcpTransport};
