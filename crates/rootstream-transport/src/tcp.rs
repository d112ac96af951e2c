//! TCP transport implementation
//!
//! Raw TCP transport for RootStream. Uses length-prefixed framing for message
//! boundaries. Each message is preceded by a 4-byte big-endian length prefix.
//! Nagle's algorithm is disabled by default so input events leave immediately.

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{
    BoxedReceiver, Connector, SharedSender, TransportEvent, TransportReceiver, TransportSender,
    TransportServer,
};

/// Maximum message size (16MB, room for a 4K keyframe)
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default channel buffer size for TCP connections
const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 256;

const LENGTH_PREFIX_SIZE: usize = 4;

/// TCP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Maximum message size in bytes
    pub max_message_size: usize,
    /// Read buffer size
    pub read_buffer_size: usize,
    /// Keep-alive interval in seconds (0 = disabled)
    pub keepalive_secs: u64,
    /// Disable send coalescing (TCP_NODELAY)
    pub nodelay: bool,
    /// Connect timeout in milliseconds (0 = none)
    pub connect_timeout_ms: u64,
    /// Queued messages per direction
    pub channel_buffer_size: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            read_buffer_size: 64 * 1024,
            keepalive_secs: 30,
            nodelay: true,
            connect_timeout_ms: 5000,
            channel_buffer_size: DEFAULT_CHANNEL_BUFFER_SIZE,
        }
    }
}

/// TCP transport
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            config: TcpConfig::default(),
        }
    }

    pub fn with_config(config: TcpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Connect to a TCP server
    pub async fn connect(&self, addr: &str) -> Result<(TcpSender, TcpReceiver)> {
        info!("Connecting to TCP: {}", addr);

        let connecting = TcpStream::connect(addr);
        let result = if self.config.connect_timeout_ms > 0 {
            tokio::time::timeout(
                Duration::from_millis(self.config.connect_timeout_ms),
                connecting,
            )
            .await
            .map_err(|_| TransportError::Timeout)?
        } else {
            connecting.await
        };
        let stream = result.map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        tune_socket(&stream, &self.config);

        info!("TCP connected to {}", addr);
        Ok(spawn_connection(stream, &self.config))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Connector`] over [`TcpTransport`]
#[derive(Default)]
pub struct TcpConnector {
    transport: TcpTransport,
}

impl TcpConnector {
    pub fn new(config: TcpConfig) -> Self {
        Self {
            transport: TcpTransport::with_config(config),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<(SharedSender, BoxedReceiver)> {
        let addr = format!("{}:{}", host, port);
        let (sender, receiver) = self.transport.connect(&addr).await?;
        Ok((Arc::new(sender), Box::new(receiver)))
    }
}

fn tune_socket(stream: &TcpStream, config: &TcpConfig) {
    if config.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
    }

    // Enable TCP keepalive if configured
    if config.keepalive_secs > 0 {
        let socket = socket2::SockRef::from(stream);
        let keepalive =
            socket2::TcpKeepalive::new().with_time(Duration::from_secs(config.keepalive_secs));
        if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
            warn!("Failed to set TCP keepalive: {}", e);
        }
    }
}

fn spawn_connection(stream: TcpStream, config: &TcpConfig) -> (TcpSender, TcpReceiver) {
    let connected = Arc::new(AtomicBool::new(true));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (outgoing_tx, outgoing_rx) = mpsc::channel::<Bytes>(config.channel_buffer_size);
    let (incoming_tx, incoming_rx) = mpsc::channel::<TransportEvent>(config.channel_buffer_size);

    let sender = TcpSender {
        tx: outgoing_tx,
        connected: connected.clone(),
        shutdown: shutdown_tx,
        max_size: config.max_message_size,
    };

    let receiver = TcpReceiver { rx: incoming_rx };

    let io = IoLoop {
        max_size: config.max_message_size,
        read_buffer_size: config.read_buffer_size,
        connected,
    };

    // Spawn reader/writer task
    tokio::spawn(async move {
        let (reader, writer) = stream.into_split();
        io.run(reader, writer, outgoing_rx, incoming_tx, shutdown_rx)
            .await;
    });

    (sender, receiver)
}

struct IoLoop {
    max_size: usize,
    read_buffer_size: usize,
    connected: Arc<AtomicBool>,
}

impl IoLoop {
    /// Shared IO loop for TCP connections
    async fn run(
        self,
        mut reader: OwnedReadHalf,
        mut writer: OwnedWriteHalf,
        mut outgoing_rx: mpsc::Receiver<Bytes>,
        incoming_tx: mpsc::Sender<TransportEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut read_buf = BytesMut::with_capacity(self.read_buffer_size);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("TCP connection closed locally");
                    let _ = writer.shutdown().await;
                    break;
                }

                Some(data) = outgoing_rx.recv() => {
                    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + data.len());
                    frame.put_u32(data.len() as u32);
                    frame.extend_from_slice(&data);

                    if let Err(e) = writer.write_all(&frame).await {
                        error!("TCP write error: {}", e);
                        let _ = incoming_tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                }

                result = reader.read_buf(&mut read_buf) => {
                    match result {
                        Ok(0) => {
                            debug!("TCP connection closed by peer");
                            let _ = incoming_tx.send(TransportEvent::Disconnected { reason: None }).await;
                            break;
                        }
                        Ok(_) => {
                            if let Err(reason) = self.drain_frames(&mut read_buf, &incoming_tx).await {
                                if let Some(reason) = reason {
                                    let _ = incoming_tx.send(TransportEvent::Error(reason)).await;
                                }
                                break;
                            }
                        }
                        Err(e) => {
                            error!("TCP read error: {}", e);
                            let _ = incoming_tx.send(TransportEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
    }

    /// Forward every complete frame in `read_buf`
    ///
    /// `Err(Some(reason))` is a framing violation, `Err(None)` means the
    /// receiver went away.
    async fn drain_frames(
        &self,
        read_buf: &mut BytesMut,
        incoming_tx: &mpsc::Sender<TransportEvent>,
    ) -> std::result::Result<(), Option<String>> {
        while read_buf.len() >= LENGTH_PREFIX_SIZE {
            let len = (&read_buf[..LENGTH_PREFIX_SIZE]).get_u32() as usize;

            if len > self.max_size {
                error!("Message too large: {} > {}", len, self.max_size);
                return Err(Some(
                    TransportError::MessageTooLarge {
                        len,
                        max: self.max_size,
                    }
                    .to_string(),
                ));
            }

            if read_buf.len() < LENGTH_PREFIX_SIZE + len {
                read_buf.reserve(LENGTH_PREFIX_SIZE + len - read_buf.len());
                break;
            }

            read_buf.advance(LENGTH_PREFIX_SIZE);
            let data = read_buf.split_to(len).freeze();
            if incoming_tx.send(TransportEvent::Data(data)).await.is_err() {
                return Err(None);
            }
        }
        Ok(())
    }
}

/// TCP sender for writing messages
pub struct TcpSender {
    tx: mpsc::Sender<Bytes>,
    connected: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    max_size: usize,
}

impl TcpSender {
    fn check(&self, data: &Bytes) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        if data.len() > self.max_size {
            return Err(TransportError::MessageTooLarge {
                len: data.len(),
                max: self.max_size,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TransportSender for TcpSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        self.check(&data)?;

        self.tx
            .send(data)
            .await
            .map_err(|_| TransportError::SendFailed("Channel closed".into()))
    }

    fn try_send(&self, data: Bytes) -> Result<()> {
        self.check(&data)?;

        self.tx.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.shutdown.send(true);
        }
        Ok(())
    }
}

impl Drop for TcpSender {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// TCP receiver for reading messages
pub struct TcpReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for TcpReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// TCP server for accepting connections
pub struct TcpServer {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpServer {
    /// Bind to an address and create a new TCP server
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, TcpConfig::default()).await
    }

    /// Bind with custom configuration
    pub async fn bind_with_config(addr: &str, config: TcpConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        info!("TCP server listening on {}", addr);

        Ok(Self { listener, config })
    }
}

#[async_trait]
impl TransportServer for TcpServer {
    type Sender = TcpSender;
    type Receiver = TcpReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;

        info!("TCP connection accepted from {}", peer_addr);
        tune_socket(&stream, &self.config);

        let (sender, receiver) = spawn_connection(stream, &self.config);
        Ok((sender, receiver, peer_addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        // TcpListener closes when dropped
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_config_default() {
        let config = TcpConfig::default();
        assert_eq!(config.max_message_size, 16 * 1024 * 1024);
        assert!(config.nodelay);
        assert_eq!(config.keepalive_secs, 30);
    }

    #[tokio::test]
    async fn test_tcp_client_server_echo() {
        let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let accept_handle = tokio::spawn(async move {
            let (sender, mut receiver, _peer) = server.accept().await.unwrap();
            if let Some(TransportEvent::Data(data)) = receiver.recv().await {
                sender.send(data).await.unwrap();
            }
            (sender, receiver)
        });

        let transport = TcpTransport::new();
        let (client_sender, mut client_receiver) =
            transport.connect(&addr.to_string()).await.unwrap();

        let test_data = Bytes::from("hello tcp");
        client_sender.send(test_data.clone()).await.unwrap();

        match client_receiver.recv().await {
            Some(TransportEvent::Data(received)) => assert_eq!(received, test_data),
            other => panic!("Expected Data event, got {:?}", other),
        }

        client_sender.close().await.unwrap();
        assert!(!client_sender.is_connected());
        let _ = accept_handle.await;
    }

    #[tokio::test]
    async fn test_oversized_inbound_frame_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&(1024u32).to_be_bytes()).await.unwrap();
            let _ = stream.read(&mut [0u8; 1]).await;
        });

        let transport = TcpTransport::with_config(TcpConfig {
            max_message_size: 512,
            ..Default::default()
        });
        let (_sender, mut receiver) = transport.connect(&addr.to_string()).await.unwrap();

        match receiver.recv().await {
            Some(TransportEvent::Error(reason)) => assert!(reason.contains("too large")),
            other => panic!("Expected Error event, got {:?}", other),
        }
    }
}
