//! RootStream Discovery
//!
//! Keeps track of the hosts a client can connect to:
//! - mDNS/Bonjour browsing for `_rootstream._tcp.local.`
//! - Manually entered peers
//! - Staleness eviction with a sorted, copy-on-read snapshot

pub mod error;
pub mod peer;
pub mod registry;

#[cfg(feature = "mdns")]
pub mod mdns;

pub use error::{DiscoveryError, Result};
pub use peer::{Peer, Sighting};
pub use registry::{DiscoveryRegistry, PeerSnapshot, Upsert, DEFAULT_STALE_TIMEOUT};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Discovery event
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A service instance was advertised
    Sighted(Sighting),
    /// A service instance withdrew (peer id)
    Removed(String),
    /// Error during discovery
    Error(String),
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Enable mDNS browsing
    pub mdns: bool,
    /// Service type to browse for
    pub service_type: String,
    /// Evict advertised peers not seen for this long (seconds)
    pub stale_timeout_secs: u64,
    /// Reconciliation pass interval (seconds)
    pub reconcile_interval_secs: u64,
    /// Buffered discovery events
    pub channel_size: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mdns: true,
            service_type: rootstream_core::MDNS_SERVICE_TYPE.to_string(),
            stale_timeout_secs: DEFAULT_STALE_TIMEOUT.as_secs(),
            reconcile_interval_secs: 5,
            channel_size: 100,
        }
    }
}

impl DiscoveryConfig {
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }
}

/// Apply discovery events to `registry` until `events` closes or `shutdown` fires
///
/// This is the single consumer that mutates the registry. A reconciliation
/// pass runs every `reconcile_interval`.
pub async fn run_consumer(
    registry: Arc<DiscoveryRegistry>,
    mut events: mpsc::Receiver<DiscoveryEvent>,
    reconcile_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reconcile = tokio::time::interval(reconcile_interval);
    reconcile.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("Discovery consumer shutting down");
                break;
            }

            event = events.recv() => {
                match event {
                    Some(DiscoveryEvent::Sighted(sighting)) => {
                        registry.upsert(sighting);
                    }
                    Some(DiscoveryEvent::Removed(id)) => {
                        registry.remove(&id);
                    }
                    Some(DiscoveryEvent::Error(e)) => {
                        warn!("Discovery error: {}", e);
                    }
                    None => {
                        debug!("Discovery event stream closed");
                        break;
                    }
                }
            }

            _ = reconcile.tick() => {
                registry.evict_stale();
            }
        }
    }
}

/// Discovery service: mDNS browsing plus the registry consumer loop
pub struct DiscoveryService {
    config: DiscoveryConfig,
    registry: Arc<DiscoveryRegistry>,
    events_tx: mpsc::Sender<DiscoveryEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<DiscoveryEvent>>>,
    shutdown: watch::Sender<bool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    #[cfg(feature = "mdns")]
    browser: Mutex<Option<mdns::MdnsBrowser>>,
}

impl DiscoveryService {
    pub fn new(config: DiscoveryConfig) -> Self {
        let registry = Arc::new(DiscoveryRegistry::with_stale_timeout(config.stale_timeout()));
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: DiscoveryConfig, registry: Arc<DiscoveryRegistry>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.channel_size.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            registry,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            shutdown,
            consumer: Mutex::new(None),
            #[cfg(feature = "mdns")]
            browser: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<DiscoveryRegistry> {
        Arc::clone(&self.registry)
    }

    /// Feed sightings from another discovery facility
    pub fn sender(&self) -> mpsc::Sender<DiscoveryEvent> {
        self.events_tx.clone()
    }

    /// Start the consumer loop and, if enabled, mDNS browsing. Idempotent.
    pub fn start(&self) -> Result<()> {
        let Some(events_rx) = self.events_rx.lock().take() else {
            debug!("Discovery already started");
            return Ok(());
        };

        #[cfg(feature = "mdns")]
        if self.config.mdns {
            *self.browser.lock() = mdns::try_browse(&self.config.service_type, self.sender());
        }

        let handle = tokio::spawn(run_consumer(
            self.registry(),
            events_rx,
            self.config.reconcile_interval(),
            self.shutdown.subscribe(),
        ));
        *self.consumer.lock() = Some(handle);

        info!("Discovery started for {}", self.config.service_type);
        Ok(())
    }

    /// Stop browsing and the consumer loop. The registry keeps its peers.
    pub async fn stop(&self) {
        #[cfg(feature = "mdns")]
        if let Some(mut browser) = self.browser.lock().take() {
            if let Err(e) = browser.stop() {
                warn!("Failed to stop mDNS browser: {}", e);
            }
        }

        let _ = self.shutdown.send(true);
        let handle = self.consumer.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
            info!("Discovery stopped");
        }
    }

    /// Current peers, sorted by display name
    pub fn peers(&self) -> PeerSnapshot {
        self.registry.snapshot()
    }

    /// Add a user-entered peer
    pub fn add_manual(&self, name: impl Into<String>, hostname: impl Into<String>, port: u16) -> Peer {
        self.registry.add_manual(name, hostname, port)
    }
}
