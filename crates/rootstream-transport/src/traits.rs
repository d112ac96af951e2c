//! Transport trait definitions

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::Result;

/// Events that can occur on a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection established
    Connected,
    /// Connection closed (clean or error)
    Disconnected { reason: Option<String> },
    /// One complete message
    Data(Bytes),
    /// Error occurred
    Error(String),
}

/// Trait for sending messages
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Send one message, waiting for buffer space
    async fn send(&self, data: Bytes) -> Result<()>;

    /// Send without waiting; fails with `BufferFull` instead
    fn try_send(&self, data: Bytes) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Close the connection. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Trait for receiving messages
#[async_trait]
pub trait TransportReceiver: Send {
    /// Receive the next event. `None` once the connection is gone.
    async fn recv(&mut self) -> Option<TransportEvent>;
}

#[async_trait]
impl<R: TransportReceiver + ?Sized> TransportReceiver for Box<R> {
    async fn recv(&mut self) -> Option<TransportEvent> {
        (**self).recv().await
    }
}

/// Sender half shared between the send path and the receive loop
pub type SharedSender = Arc<dyn TransportSender>;

/// Receiver half owned by the receive loop
pub type BoxedReceiver = Box<dyn TransportReceiver>;

/// Opens connections to a host
///
/// The seam that lets the client swap TCP for an in-memory transport.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `host:port`
    async fn connect(&self, host: &str, port: u16) -> Result<(SharedSender, BoxedReceiver)>;
}

/// Trait for transport servers (listeners)
#[async_trait]
pub trait TransportServer: Send + Sync {
    /// The sender type for accepted connections
    type Sender: TransportSender;
    /// The receiver type for accepted connections
    type Receiver: TransportReceiver;

    /// Accept a new connection
    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Close the server
    async fn close(&self) -> Result<()>;
}
