//! Transport session
//!
//! One connection to one host and the state machine around it:
//!
//! ```text
//!  Disconnected ──connect──▶ Connecting ──ok──▶ Connected ──media──▶ Streaming
//!       ▲                        │                  │                    │
//!       │                      fail          I/O failure or N consecutive send failures
//!       │                        ▼                  ▼                    ▼
//!   disconnect              Error(reason) ◀──fail── Reconnecting ◀───────┘
//!   (any state)                                     │
//!                                                   └──ok──▶ Connected
//! ```
//!
//! Every link carries a generation number. `disconnect()` and each reconnect
//! bump it, so events from a link that has already been replaced are ignored
//! and at most one connection attempt is in flight.

use bytes::Bytes;
use parking_lot::Mutex;
use rootstream_core::{CryptoError, InputEvent, PacketType, SecuritySession, StreamPacket};
use rootstream_discovery::Peer;
use rootstream_transport::{
    BoxedReceiver, Connector, SharedSender, TransportError, TransportEvent,
};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::builder::{SessionConfig, TransportSessionBuilder};
use crate::context::ClientContext;
use crate::error::{ClientError, DecodeError, Result};
use crate::metrics::{LinkMetrics, LinkMetricsSample, WINDOW};
use crate::pipeline::{DecodePipeline, PresentationQueue};
use crate::state::ConnectionState;

/// Session counters at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub packets_sent: u64,
    pub send_failures: u64,
    /// Messages dropped because they did not decode as packets
    pub protocol_drops: u64,
    /// Messages dropped because they did not decrypt
    pub crypto_drops: u64,
    pub control_packets: u64,
    pub keepalives_echoed: u64,
    pub reconnect_attempts: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    packets_sent: AtomicU64,
    send_failures: AtomicU64,
    protocol_drops: AtomicU64,
    crypto_drops: AtomicU64,
    control_packets: AtomicU64,
    keepalives_echoed: AtomicU64,
    reconnect_attempts: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            protocol_drops: self.protocol_drops.load(Ordering::Relaxed),
            crypto_drops: self.crypto_drops.load(Ordering::Relaxed),
            control_packets: self.control_packets.load(Ordering::Relaxed),
            keepalives_echoed: self.keepalives_echoed.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.packets_sent,
            &self.send_failures,
            &self.protocol_drops,
            &self.crypto_drops,
            &self.control_packets,
            &self.keepalives_echoed,
            &self.reconnect_attempts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// An open link owned by the session
struct Link {
    generation: u64,
    sender: SharedSender,
    cancel: watch::Sender<bool>,
    receive_task: JoinHandle<()>,
}

impl Link {
    /// Stop the receive loop and close the socket without waiting
    fn abandon(self) {
        let _ = self.cancel.send(true);
        let sender = self.sender;
        tokio::spawn(async move {
            if let Err(e) = sender.close().await {
                debug!("Close after link loss: {}", e);
            }
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkLoss {
    Io,
    SendFailures,
}

struct SessionInner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    security: Arc<SecuritySession>,
    pipeline: Arc<DecodePipeline>,
    metrics: Arc<LinkMetrics>,
    state_tx: watch::Sender<ConnectionState>,
    /// Every transition in order, unlike the coalescing watch
    transitions_tx: broadcast::Sender<ConnectionState>,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
    peer: Mutex<Option<Peer>>,
    /// Held by `disconnect()` throughout, and by `connect()` until its
    /// generation is installed
    lifecycle: tokio::sync::Mutex<()>,
    /// Wire order matches sequence order
    send_lock: tokio::sync::Mutex<()>,
    next_sequence: AtomicU32,
    consecutive_send_failures: AtomicU32,
    control_tx: broadcast::Sender<StreamPacket>,
    stats: StatsCounters,
}

/// A client connection to a RootStream host
pub struct TransportSession {
    inner: Arc<SessionInner>,
}

impl TransportSession {
    /// Create a disconnected session (use builder for more options)
    pub fn new(config: SessionConfig, ctx: &ClientContext) -> Self {
        let pipeline = DecodePipeline::new(
            ctx.video_decoder().clone(),
            ctx.audio_decoder().clone(),
            ctx.audio_renderer().clone(),
            config.pipeline_config(),
        );
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (control_tx, _) = broadcast::channel(config.control_channel_size.max(1));
        let (transitions_tx, _) = broadcast::channel(config.control_channel_size.max(1));

        Self {
            inner: Arc::new(SessionInner {
                config,
                connector: ctx.connector().clone(),
                security: ctx.security().clone(),
                pipeline: Arc::new(pipeline),
                metrics: Arc::new(LinkMetrics::new()),
                state_tx,
                transitions_tx,
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
                peer: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                send_lock: tokio::sync::Mutex::new(()),
                next_sequence: AtomicU32::new(1),
                consecutive_send_failures: AtomicU32::new(0),
                control_tx,
                stats: StatsCounters::default(),
            }),
        }
    }

    /// Create a builder
    pub fn builder() -> TransportSessionBuilder {
        TransportSessionBuilder::new()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Connect to `peer`
    ///
    /// Only valid from Disconnected or Error; otherwise the call is rejected
    /// and the current state is left alone. Returns a receiver of state
    /// changes once the session is Connected.
    pub async fn connect(&self, peer: &Peer) -> Result<watch::Receiver<ConnectionState>> {
        let inner = &self.inner;
        let lifecycle = inner.lifecycle.lock().await;

        let mut current = ConnectionState::Disconnected;
        let started = inner.state_tx.send_if_modified(|state| {
            if state.can_connect() {
                *state = ConnectionState::Connecting;
                let _ = inner.transitions_tx.send(ConnectionState::Connecting);
                true
            } else {
                current = state.clone();
                false
            }
        });
        if !started {
            debug!("Connect rejected while {}", current);
            return Err(ClientError::ConnectRejected(current));
        }

        let states = inner.state_tx.subscribe();
        let generation = {
            let mut link = inner.link.lock();
            if let Some(stale) = link.take() {
                stale.abandon();
            }
            inner.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        inner.metrics.reset();
        inner.stats.reset();
        inner.next_sequence.store(1, Ordering::SeqCst);
        inner.consecutive_send_failures.store(0, Ordering::SeqCst);
        *inner.peer.lock() = Some(peer.clone());
        drop(lifecycle);

        info!("Connecting to {} at {}", peer.name, peer.address());
        inner.open_link(peer, generation).await?;
        Ok(states)
    }

    /// Tear down the connection. Valid from any state; idempotent.
    ///
    /// Stops the receive loop, closes the socket, releases the decoder session
    /// and discards the session keys, then moves to Disconnected.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;

        let link = {
            let mut link = inner.link.lock();
            inner.generation.fetch_add(1, Ordering::SeqCst);
            link.take()
        };

        let Some(link) = link else {
            if *inner.state_tx.borrow() == ConnectionState::Disconnected {
                debug!("Disconnect while already disconnected");
                return;
            }
            inner.release().await;
            return;
        };

        let _ = link.cancel.send(true);
        if let Err(e) = link.sender.close().await {
            debug!("Close on disconnect: {}", e);
        }
        if let Err(e) = link.receive_task.await {
            warn!("Receive loop ended abnormally: {}", e);
        }
        inner.release().await;
    }

    /// Send an input event to the host
    ///
    /// Best-effort: a failed send is logged and counted. Repeated failures
    /// drop the link.
    pub async fn send(&self, event: &InputEvent) -> Result<u32> {
        self.inner
            .send_packet(PacketType::InputEvent, event.to_payload())
            .await
    }

    /// Send a control message to the host
    pub async fn send_control(&self, payload: impl Into<Bytes>) -> Result<u32> {
        self.inner
            .send_packet(PacketType::Control, payload.into())
            .await
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    /// Watch connection state
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Every state transition, in order
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.transitions_tx.subscribe()
    }

    pub fn metrics(&self) -> LinkMetricsSample {
        self.inner.metrics.sample()
    }

    /// Watch link metrics
    pub fn subscribe_metrics(&self) -> watch::Receiver<LinkMetricsSample> {
        self.inner.metrics.subscribe()
    }

    /// Control and Auth packets from the host
    pub fn subscribe_control(&self) -> broadcast::Receiver<StreamPacket> {
        self.inner.control_tx.subscribe()
    }

    /// Decoded frames ready for presentation
    pub fn frames(&self) -> Arc<PresentationQueue> {
        self.inner.pipeline.frames()
    }

    pub fn pipeline(&self) -> &Arc<DecodePipeline> {
        &self.inner.pipeline
    }

    pub fn set_volume(&self, volume: f32) {
        self.inner.pipeline.set_volume(volume);
    }

    pub fn stats(&self) -> SessionStats {
        self.inner.stats.snapshot()
    }

    /// The peer of the current or last connection
    pub fn peer(&self) -> Option<Peer> {
        self.inner.peer.lock().clone()
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        let link = {
            let mut link = self.inner.link.lock();
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            link.take()
        };
        if let Some(link) = link {
            let _ = link.cancel.send(true);
        }
    }
}

impl SessionInner {
    fn current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Move to `to` if `generation` is still current and `from` accepts the
    /// present state
    fn transition(
        &self,
        generation: u64,
        from: impl Fn(&ConnectionState) -> bool,
        to: ConnectionState,
    ) -> bool {
        self.state_tx.send_if_modified(|state| {
            if self.current(generation) && from(state) && *state != to {
                *state = to.clone();
                let _ = self.transitions_tx.send(to.clone());
                true
            } else {
                false
            }
        })
    }

    fn fail_attempt(&self, generation: u64, reason: String) {
        self.transition(
            generation,
            |s| matches!(s, ConnectionState::Connecting | ConnectionState::Reconnecting),
            ConnectionState::Error(reason),
        );
    }

    /// Connect the transport and start the receive loop
    async fn open_link(self: &Arc<Self>, peer: &Peer, generation: u64) -> Result<()> {
        if self.config.encrypt && !self.security.is_authenticated() {
            warn!("Refusing to connect to {}: not authenticated", peer.name);
            self.fail_attempt(generation, CryptoError::NotAuthenticated.to_string());
            return Err(CryptoError::NotAuthenticated.into());
        }

        let host = peer.connect_host();
        let (sender, receiver) = match self.connector.connect(&host, peer.port).await {
            Ok(halves) => halves,
            Err(e) => {
                warn!("Connection to {}:{} failed: {}", host, peer.port, e);
                self.fail_attempt(generation, e.to_string());
                return Err(ClientError::ConnectionFailed(e.to_string()));
            }
        };

        self.metrics.new_link();

        let superseded = {
            let mut link = self.link.lock();
            if self.current(generation) {
                let (cancel, cancel_rx) = watch::channel(false);
                let receive_task = tokio::spawn(receive_loop(
                    self.clone(),
                    receiver,
                    cancel_rx,
                    generation,
                ));
                *link = Some(Link {
                    generation,
                    sender,
                    cancel,
                    receive_task,
                });
                None
            } else {
                Some(sender)
            }
        };

        if let Some(sender) = superseded {
            debug!("Connection to {} superseded while opening", peer.name);
            let _ = sender.close().await;
            return Err(ClientError::Cancelled);
        }

        self.transition(
            generation,
            |s| matches!(s, ConnectionState::Connecting | ConnectionState::Reconnecting),
            ConnectionState::Connected,
        );
        info!("Connected to {} ({}:{})", peer.name, host, peer.port);

        if self.config.send_auth_token {
            if let Some(token) = self.security.token() {
                let payload = Bytes::copy_from_slice(token.as_str().as_bytes());
                if let Err(e) = self.send_packet(PacketType::Auth, payload).await {
                    warn!("Failed to send session token: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Seal and write one packet, returning its sequence number
    async fn send_packet(self: &Arc<Self>, packet_type: PacketType, payload: Bytes) -> Result<u32> {
        if !self.state_tx.borrow().is_connected() {
            return Err(ClientError::NotConnected);
        }

        let _guard = self.send_lock.lock().await;

        let (sender, generation) = self
            .link
            .lock()
            .as_ref()
            .map(|link| (link.sender.clone(), link.generation))
            .ok_or(ClientError::NotConnected)?;

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let packet = StreamPacket::new(
            packet_type,
            rootstream_core::time::now_ms(),
            sequence,
            payload,
        );

        let encoded = packet.encode();
        let message = if self.config.encrypt {
            Bytes::from(self.security.encrypt(&encoded)?)
        } else {
            encoded
        };

        match sender.send(message).await {
            Ok(()) => {
                self.consecutive_send_failures.store(0, Ordering::SeqCst);
                self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                Ok(sequence)
            }
            Err(e) => {
                self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                if !e.is_link_failure() {
                    warn!("Dropped outgoing packet seq={}: {}", sequence, e);
                    return Err(e.into());
                }

                let failures = self.consecutive_send_failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!("Send failed seq={} ({} consecutive): {}", sequence, failures, e);

                if failures >= self.config.send_failure_threshold.max(1) {
                    self.consecutive_send_failures.store(0, Ordering::SeqCst);
                    self.link_lost(
                        generation,
                        format!("{} consecutive send failures", failures),
                        LinkLoss::SendFailures,
                    );
                }
                Err(ClientError::SendFailed(e.to_string()))
            }
        }
    }

    /// Drop the link of `generation` and schedule a reconnect if enabled
    fn link_lost(self: &Arc<Self>, generation: u64, reason: String, cause: LinkLoss) {
        let taken = {
            let mut link = self.link.lock();
            match link.as_ref() {
                Some(current) if current.generation == generation => {
                    let next = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    link.take().map(|link| (link, next))
                }
                _ => None,
            }
        };
        let Some((link, next)) = taken else {
            debug!("Ignoring loss of superseded link: {}", reason);
            return;
        };
        link.abandon();

        let any = |_: &ConnectionState| true;
        match cause {
            LinkLoss::Io => {
                error!("Connection lost: {}", reason);
                self.transition(next, any, ConnectionState::Error(reason.clone()));
            }
            LinkLoss::SendFailures => {
                warn!("Dropping link after {}", reason);
            }
        }

        if self.config.auto_reconnect {
            self.transition(next, any, ConnectionState::Reconnecting);
            self.spawn_reconnect(next);
        } else {
            self.transition(next, any, ConnectionState::Error(reason));
        }
    }

    /// A single reconnect attempt after the configured interval
    fn spawn_reconnect(self: &Arc<Self>, generation: u64) {
        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.config.reconnect_interval()).await;
            if !inner.current(generation) {
                debug!("Reconnect abandoned");
                return;
            }
            let Some(peer) = inner.peer.lock().clone() else {
                return;
            };

            inner.stats.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
            info!("Reconnecting to {}", peer.name);
            if let Err(e) = inner.open_link(&peer, generation).await {
                warn!("Reconnect to {} failed: {}", peer.name, e);
            }
        });
    }

    /// Release decoder and key material, then settle in Disconnected
    async fn release(&self) {
        self.pipeline.reset().await;
        self.security.logout();
        self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                return false;
            }
            *state = ConnectionState::Disconnected;
            let _ = self.transitions_tx.send(ConnectionState::Disconnected);
            true
        });
        info!("Disconnected");
    }

    fn handle_message(self: &Arc<Self>, data: Bytes, generation: u64) {
        let plaintext = if self.config.encrypt {
            match self.security.decrypt(&data) {
                Ok(plaintext) => Bytes::from(plaintext),
                Err(e) => {
                    self.stats.crypto_drops.fetch_add(1, Ordering::Relaxed);
                    debug!("Dropping message ({} bytes): {}", data.len(), e);
                    return;
                }
            }
        } else {
            data
        };

        let packet = match StreamPacket::decode(plaintext) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.protocol_drops.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping message: {}", e);
                return;
            }
        };

        self.metrics.record(&packet);

        match packet.packet_type() {
            PacketType::VideoFrame | PacketType::AudioFrame => {
                match self.pipeline.submit(&packet) {
                    Ok(()) => {}
                    Err(DecodeError::InvalidPayload(e)) => {
                        self.stats.protocol_drops.fetch_add(1, Ordering::Relaxed);
                        debug!("Dropping media packet seq={}: {}", packet.sequence(), e);
                        return;
                    }
                    Err(e) => debug!("Media packet seq={} not decoded: {}", packet.sequence(), e),
                }
                if self.transition(
                    generation,
                    |s| *s == ConnectionState::Connected,
                    ConnectionState::Streaming,
                ) {
                    info!("Streaming");
                }
            }
            PacketType::KeepAlive => {
                let inner = self.clone();
                let payload = packet.payload().clone();
                tokio::spawn(async move {
                    if inner.send_packet(PacketType::KeepAlive, payload).await.is_ok() {
                        inner.stats.keepalives_echoed.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
            PacketType::Control | PacketType::Auth => {
                self.stats.control_packets.fetch_add(1, Ordering::Relaxed);
                // No subscribers is fine
                let _ = self.control_tx.send(packet);
            }
            PacketType::InputEvent => {
                debug!("Ignoring input event from host");
            }
        }
    }
}

async fn receive_loop(
    inner: Arc<SessionInner>,
    mut receiver: BoxedReceiver,
    mut cancel: watch::Receiver<bool>,
    generation: u64,
) {
    let mut tick = tokio::time::interval(WINDOW);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let failure = loop {
        let event = tokio::select! {
            biased;
            _ = cancel.changed() => break None,
            _ = tick.tick() => {
                inner.metrics.tick_at(Instant::now());
                continue;
            }
            event = receiver.recv() => event,
        };

        match event {
            Some(TransportEvent::Data(data)) => inner.handle_message(data, generation),
            Some(TransportEvent::Connected) => {}
            Some(TransportEvent::Error(e)) => break Some(e),
            Some(TransportEvent::Disconnected { reason }) => {
                break Some(reason.unwrap_or_else(|| TransportError::ConnectionClosed.to_string()))
            }
            None => break Some(TransportError::ConnectionClosed.to_string()),
        }
    };

    if let Some(reason) = failure {
        inner.link_lost(generation, reason, LinkLoss::Io);
    }
    debug!("Receive loop stopped");
}
