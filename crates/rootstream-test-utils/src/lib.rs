//! Common test helpers and utilities for RootStream tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - A loopback [`MockHost`] that speaks the wire format over TCP
//! - A scriptable in-memory [`MockConnector`]
//! - Scriptable decoders and a collecting audio renderer

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rootstream_client::{
    AudioRenderer, ConnectionState, DecodeError, DecodedFrame, PcmBuffer, VideoDecodeSession,
    VideoDecoder,
};
use rootstream_core::{
    AudioFrameDescriptor, PacketType, SecuritySession, SessionToken, StreamPacket, SymmetricKey,
    VideoCodec, VideoFormat, VideoFrameDescriptor,
};
use rootstream_discovery::Peer;
use rootstream_transport::{
    BoxedReceiver, Connector, SharedSender, TcpSender, TcpServer, TransportError, TransportEvent,
    TransportReceiver, TransportSender, TransportServer,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait until a synchronous predicate holds
pub async fn wait_until<F>(check: F, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    wait_for(|| std::future::ready(check()), DEFAULT_CHECK_INTERVAL, max_wait).await
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU64, target: u64, max_wait: Duration) -> bool {
    wait_until(|| counter.load(Ordering::SeqCst) >= target, max_wait).await
}

/// Wait for a connection state matching `pred`
pub async fn wait_for_state<F>(
    states: &mut watch::Receiver<ConnectionState>,
    pred: F,
    max_wait: Duration,
) -> bool
where
    F: Fn(&ConnectionState) -> bool,
{
    tokio::time::timeout(max_wait, states.wait_for(|s| pred(s)))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Key material
// ============================================================================

/// A fixed key shared by a test host and client
pub fn test_key() -> [u8; 32] {
    [0x42; 32]
}

/// A security session already holding [`test_key`]
pub fn preshared_session() -> Arc<SecuritySession> {
    Arc::new(SecuritySession::preshared(
        SessionToken::new("test-token"),
        SymmetricKey::from_bytes(test_key()),
    ))
}

// ============================================================================
// Packet builders
// ============================================================================

pub fn video_packet(seq: u32, timestamp: u64, width: u16, height: u16, data: &[u8]) -> StreamPacket {
    let frame = VideoFrameDescriptor::new(
        VideoCodec::H264,
        width,
        height,
        Bytes::copy_from_slice(data),
    );
    StreamPacket::new(PacketType::VideoFrame, timestamp, seq, frame.encode())
}

pub fn audio_packet(seq: u32, timestamp: u64, pcm: &[i16]) -> StreamPacket {
    let data: Vec<u8> = pcm.iter().flat_map(|s| s.to_le_bytes()).collect();
    let frame = AudioFrameDescriptor::new(48_000, 1, Bytes::from(data));
    StreamPacket::new(PacketType::AudioFrame, timestamp, seq, frame.encode())
}

// ============================================================================
// Mock Host - loopback TCP server speaking the wire format
// ============================================================================

#[derive(Default)]
struct HostState {
    current: Mutex<Option<TcpSender>>,
    received: Mutex<Vec<StreamPacket>>,
    undecodable: AtomicU64,
    connections: AtomicU64,
}

/// A host that accepts client connections on `127.0.0.1`
///
/// Messages are sealed and opened with `security` when given. Only the most
/// recent connection is kept; packets sent by clients are collected.
pub struct MockHost {
    port: u16,
    state: Arc<HostState>,
    security: Option<Arc<SecuritySession>>,
    handle: Option<JoinHandle<()>>,
}

impl MockHost {
    /// Start a host that exchanges plaintext packets
    pub async fn start() -> Self {
        Self::start_with_security(None).await
    }

    /// Start a host using [`test_key`]
    pub async fn start_encrypted() -> Self {
        Self::start_with_security(Some(preshared_session())).await
    }

    pub async fn start_with_security(security: Option<Arc<SecuritySession>>) -> Self {
        let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let state = Arc::new(HostState::default());

        let handle = {
            let state = state.clone();
            let security = security.clone();
            tokio::spawn(async move {
                while let Ok((sender, receiver, _addr)) = server.accept().await {
                    state.connections.fetch_add(1, Ordering::SeqCst);
                    *state.current.lock() = Some(sender);
                    tokio::spawn(collect(state.clone(), security.clone(), receiver));
                }
            })
        };

        Self {
            port,
            state,
            security,
            handle: Some(handle),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// A manual peer pointing at this host
    pub fn peer(&self) -> Peer {
        Peer::manual("Mock Host", "127.0.0.1", self.port)
    }

    /// Connections accepted so far
    pub fn connections(&self) -> u64 {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub async fn wait_for_connections(&self, n: u64) -> bool {
        wait_for_count(&self.state.connections, n, DEFAULT_TIMEOUT).await
    }

    /// Encode (and seal) a packet and send it to the current client
    pub async fn send_packet(&self, packet: &StreamPacket) -> bool {
        let encoded = packet.encode();
        let message = match &self.security {
            Some(security) => Bytes::from(security.encrypt(&encoded).unwrap()),
            None => encoded,
        };
        self.send_raw(message).await
    }

    /// Send a message body as-is
    pub async fn send_raw(&self, message: Bytes) -> bool {
        let sender = self.state.current.lock().take();
        let Some(sender) = sender else {
            return false;
        };
        let ok = sender.send(message).await.is_ok();
        let mut current = self.state.current.lock();
        if current.is_none() {
            *current = Some(sender);
        }
        ok
    }

    /// Close the current client connection
    pub async fn drop_connection(&self) {
        let sender = self.state.current.lock().take();
        if let Some(sender) = sender {
            let _ = sender.close().await;
        }
    }

    /// Packets received from clients, in arrival order
    pub fn received(&self) -> Vec<StreamPacket> {
        self.state.received.lock().clone()
    }

    pub fn received_of(&self, packet_type: PacketType) -> Vec<StreamPacket> {
        self.received()
            .into_iter()
            .filter(|p| p.packet_type() == packet_type)
            .collect()
    }

    /// Messages that did not open or decode
    pub fn undecodable(&self) -> u64 {
        self.state.undecodable.load(Ordering::SeqCst)
    }

    pub async fn wait_for_received(&self, packet_type: PacketType, n: usize) -> bool {
        wait_until(|| self.received_of(packet_type).len() >= n, DEFAULT_TIMEOUT).await
    }

    /// Stop accepting (also happens on drop)
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for MockHost {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn collect<R: TransportReceiver>(
    state: Arc<HostState>,
    security: Option<Arc<SecuritySession>>,
    mut receiver: R,
) {
    while let Some(event) = receiver.recv().await {
        let data = match event {
            TransportEvent::Data(data) => data,
            TransportEvent::Disconnected { .. } => break,
            _ => continue,
        };

        let plaintext = match &security {
            Some(security) => match security.decrypt(&data) {
                Ok(p) => Bytes::from(p),
                Err(_) => {
                    state.undecodable.fetch_add(1, Ordering::SeqCst);
                    continue;
                }
            },
            None => data,
        };

        match StreamPacket::decode(plaintext) {
            Ok(packet) => state.received.lock().push(packet),
            Err(_) => {
                state.undecodable.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

// ============================================================================
// Mock Connector - in-memory links
// ============================================================================

/// What the next `connect()` does
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    Link,
    Fail(String),
}

#[derive(Default)]
struct LinkState {
    sent: Mutex<Vec<Bytes>>,
    failing: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicU32,
}

/// Test-side handle to one in-memory connection
#[derive(Clone)]
pub struct MockLink {
    state: Arc<LinkState>,
    events: mpsc::Sender<TransportEvent>,
    host: String,
    port: u16,
}

impl MockLink {
    /// Deliver a message to the client
    pub async fn inject(&self, message: Bytes) -> bool {
        self.events.send(TransportEvent::Data(message)).await.is_ok()
    }

    /// Deliver an encoded packet to the client
    pub async fn inject_packet(&self, packet: &StreamPacket) -> bool {
        self.inject(packet.encode()).await
    }

    /// Report an I/O failure to the client
    pub async fn fail(&self, reason: &str) {
        let _ = self
            .events
            .send(TransportEvent::Disconnected {
                reason: Some(reason.to_string()),
            })
            .await;
    }

    /// Make subsequent sends fail with an I/O error
    pub fn set_send_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages the client wrote, in order
    pub fn sent(&self) -> Vec<Bytes> {
        self.state.sent.lock().clone()
    }

    /// Sent messages decoded as plaintext packets
    pub fn sent_packets(&self) -> Vec<StreamPacket> {
        self.sent()
            .into_iter()
            .filter_map(|m| StreamPacket::decode(m).ok())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u32 {
        self.state.close_calls.load(Ordering::SeqCst)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

struct MockSender {
    state: Arc<LinkState>,
}

#[async_trait]
impl TransportSender for MockSender {
    async fn send(&self, data: Bytes) -> rootstream_transport::Result<()> {
        self.try_send(data)
    }

    fn try_send(&self, data: Bytes) -> rootstream_transport::Result<()> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        if self.state.failing.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("broken pipe".into()));
        }
        self.state.sent.lock().push(data);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.state.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> rootstream_transport::Result<()> {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MockReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for MockReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// A [`Connector`] that hands out in-memory links
///
/// Outcomes are consumed in order; once the script is empty every connect
/// succeeds.
#[derive(Default)]
pub struct MockConnector {
    script: Mutex<VecDeque<ConnectOutcome>>,
    links: Mutex<Vec<MockLink>>,
    attempts: AtomicU64,
    delay: Mutex<Option<Duration>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(outcomes: impl IntoIterator<Item = ConnectOutcome>) -> Self {
        let connector = Self::default();
        connector.script.lock().extend(outcomes);
        connector
    }

    pub fn push_outcome(&self, outcome: ConnectOutcome) {
        self.script.lock().push_back(outcome);
    }

    /// Hold every connect for `delay` before resolving
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn wait_for_attempts(&self, n: u64) -> bool {
        wait_for_count(&self.attempts, n, DEFAULT_TIMEOUT).await
    }

    pub fn links(&self) -> Vec<MockLink> {
        self.links.lock().clone()
    }

    /// The most recently opened link
    pub fn latest(&self) -> Option<MockLink> {
        self.links.lock().last().cloned()
    }

    pub async fn wait_for_links(&self, n: usize) -> bool {
        wait_until(|| self.links.lock().len() >= n, DEFAULT_TIMEOUT).await
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> rootstream_transport::Result<(SharedSender, BoxedReceiver)> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.script.lock().pop_front().unwrap_or(ConnectOutcome::Link);
        if let ConnectOutcome::Fail(reason) = outcome {
            return Err(TransportError::ConnectionFailed(reason));
        }

        let (events, rx) = mpsc::channel(256);
        let state = Arc::new(LinkState::default());
        self.links.lock().push(MockLink {
            state: state.clone(),
            events,
            host: host.to_string(),
            port,
        });

        Ok((
            Arc::new(MockSender { state }),
            Box::new(MockReceiver { rx }),
        ))
    }
}

// ============================================================================
// Scripted decoders and renderers
// ============================================================================

#[derive(Default)]
struct DecoderState {
    failures: Mutex<VecDeque<bool>>,
    opened: Mutex<Vec<VideoFormat>>,
    closed: AtomicU32,
    decoded: AtomicU64,
    hold: Mutex<Option<Duration>>,
}

/// A video decoder whose per-frame outcome is scripted
///
/// Each queued `true` makes one decode call fail; once the script is
/// exhausted every decode succeeds and returns the access unit unchanged.
#[derive(Clone, Default)]
pub struct ScriptedVideoDecoder {
    state: Arc<DecoderState>,
}

impl ScriptedVideoDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `n` consecutive failures
    pub fn fail_next(&self, n: usize) {
        self.state.failures.lock().extend(std::iter::repeat(true).take(n));
    }

    /// Queue one success
    pub fn succeed_next(&self) {
        self.state.failures.lock().push_back(false);
    }

    /// Sleep this long inside every decode call
    pub fn set_decode_time(&self, hold: Duration) {
        *self.state.hold.lock() = Some(hold);
    }

    /// Formats sessions were opened for, in order
    pub fn opened(&self) -> Vec<VideoFormat> {
        self.state.opened.lock().clone()
    }

    pub fn closed(&self) -> u32 {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn decoded(&self) -> u64 {
        self.state.decoded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoDecoder for ScriptedVideoDecoder {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self, format: VideoFormat) -> Result<Box<dyn VideoDecodeSession>, DecodeError> {
        self.state.opened.lock().push(format);
        Ok(Box::new(ScriptedSession {
            format,
            state: self.state.clone(),
        }))
    }
}

struct ScriptedSession {
    format: VideoFormat,
    state: Arc<DecoderState>,
}

#[async_trait]
impl VideoDecodeSession for ScriptedSession {
    fn format(&self) -> VideoFormat {
        self.format
    }

    async fn decode(
        &mut self,
        frame: &VideoFrameDescriptor,
        timestamp: u64,
    ) -> Result<DecodedFrame, DecodeError> {
        let hold = *self.state.hold.lock();
        if let Some(hold) = hold {
            tokio::time::sleep(hold).await;
        }

        let fail = self.state.failures.lock().pop_front().unwrap_or(false);
        if fail {
            return Err(DecodeError::CodecFailure("scripted failure".into()));
        }

        self.state.decoded.fetch_add(1, Ordering::SeqCst);
        Ok(DecodedFrame {
            timestamp,
            format: frame.format(),
            data: frame.data.clone(),
        })
    }

    async fn close(&mut self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// An audio renderer that keeps everything it is given
#[derive(Default)]
pub struct CollectingAudioRenderer {
    buffers: Mutex<Vec<PcmBuffer>>,
    flushes: AtomicU32,
}

impl CollectingAudioRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffers(&self) -> Vec<PcmBuffer> {
        self.buffers.lock().clone()
    }

    pub fn flushes(&self) -> u32 {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl AudioRenderer for CollectingAudioRenderer {
    fn schedule(&self, buffer: PcmBuffer) {
        self.buffers.lock().push(buffer);
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}
