//! Set of currently reachable peers
//!
//! Sightings upsert peers by id and refresh `last_seen`. A reconciliation
//! pass evicts advertised peers not seen for longer than the stale timeout.
//! Readers get an immutable snapshot sorted by display name; it is rebuilt
//! after every mutation so reads never observe a half-applied change.

use crate::peer::{Peer, Sighting};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};

/// Default staleness bound for advertised peers
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(60);

/// Immutable, sorted peer list
pub type PeerSnapshot = Arc<[Peer]>;

/// Outcome of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// First sighting of this id
    Added,
    /// Known id; details or `last_seen` refreshed
    Refreshed,
}

pub struct DiscoveryRegistry {
    peers: RwLock<HashMap<String, Peer>>,
    snapshot: RwLock<PeerSnapshot>,
    snapshot_tx: watch::Sender<PeerSnapshot>,
    stale_timeout: Duration,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::with_stale_timeout(DEFAULT_STALE_TIMEOUT)
    }

    pub fn with_stale_timeout(stale_timeout: Duration) -> Self {
        let empty: PeerSnapshot = Arc::from(Vec::new());
        let (snapshot_tx, _) = watch::channel(empty.clone());
        Self {
            peers: RwLock::new(HashMap::new()),
            snapshot: RwLock::new(empty),
            snapshot_tx,
            stale_timeout,
        }
    }

    pub fn stale_timeout(&self) -> Duration {
        self.stale_timeout
    }

    /// Record a sighting now
    pub fn upsert(&self, sighting: Sighting) -> Upsert {
        self.upsert_at(sighting, Instant::now())
    }

    /// Record a sighting observed at `now`
    pub fn upsert_at(&self, sighting: Sighting, now: Instant) -> Upsert {
        let peer = sighting.into_peer(now);
        let outcome = {
            let mut peers = self.peers.write();
            match peers.get_mut(&peer.id) {
                Some(existing) => {
                    *existing = Peer {
                        is_manual: existing.is_manual,
                        ..peer
                    };
                    Upsert::Refreshed
                }
                None => {
                    info!("Peer found: {} ({})", peer.name, peer.address());
                    peers.insert(peer.id.clone(), peer);
                    Upsert::Added
                }
            }
        };
        self.publish();
        outcome
    }

    /// Add a user-entered peer. Re-adding the same host and port renames it.
    pub fn add_manual(&self, name: impl Into<String>, hostname: impl Into<String>, port: u16) -> Peer {
        let peer = Peer::manual(name, hostname, port);
        info!("Manual peer added: {} ({})", peer.name, peer.address());
        self.peers.write().insert(peer.id.clone(), peer.clone());
        self.publish();
        peer
    }

    /// Remove a peer by id, manual or not
    pub fn remove(&self, id: &str) -> Option<Peer> {
        let removed = self.peers.write().remove(id);
        if let Some(peer) = &removed {
            info!("Peer removed: {}", peer.name);
            self.publish();
        }
        removed
    }

    /// Evict stale advertised peers now
    pub fn evict_stale(&self) -> Vec<Peer> {
        self.evict_stale_at(Instant::now())
    }

    /// Evict advertised peers whose `last_seen` is older than the timeout at `now`
    pub fn evict_stale_at(&self, now: Instant) -> Vec<Peer> {
        let mut evicted = Vec::new();
        {
            let mut peers = self.peers.write();
            peers.retain(|_, peer| {
                let stale = !peer.is_manual
                    && now.saturating_duration_since(peer.last_seen) > self.stale_timeout;
                if stale {
                    evicted.push(peer.clone());
                }
                !stale
            });
        }

        if !evicted.is_empty() {
            for peer in &evicted {
                info!("Peer lost (stale): {}", peer.name);
            }
            self.publish();
        } else {
            debug!("Reconciliation: no stale peers");
        }
        evicted
    }

    /// Current peers, sorted by display name
    pub fn snapshot(&self) -> PeerSnapshot {
        self.snapshot.read().clone()
    }

    /// Watch the snapshot; a new value is published after every mutation
    pub fn subscribe(&self) -> watch::Receiver<PeerSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn get(&self, id: &str) -> Option<Peer> {
        self.peers.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    fn publish(&self) {
        // Snapshot lock first so concurrent publishers land in mutation order
        let mut current = self.snapshot.write();
        let mut sorted: Vec<Peer> = self.peers.read().values().cloned().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        let snapshot: PeerSnapshot = Arc::from(sorted);

        *current = snapshot.clone();
        self.snapshot_tx.send_replace(snapshot);
    }
}

impl Default for DiscoveryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
