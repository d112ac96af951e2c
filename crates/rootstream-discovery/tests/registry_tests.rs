//! Discovery registry and service tests

use rootstream_discovery::{
    run_consumer, DiscoveryConfig, DiscoveryEvent, DiscoveryRegistry, DiscoveryService, Sighting,
    Upsert,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

fn sighting(instance: &str) -> Sighting {
    Sighting::new(instance, "_rootstream._tcp", "local", format!("{}.local", instance), 8000)
}

#[test]
fn test_stale_peer_evicted_after_timeout() {
    let registry = DiscoveryRegistry::new();
    let t0 = Instant::now();
    registry.upsert_at(sighting("den"), t0);

    // Exactly at the bound is not yet stale
    assert!(registry.evict_stale_at(t0 + Duration::from_secs(60)).is_empty());
    assert_eq!(registry.snapshot().len(), 1);

    let evicted = registry.evict_stale_at(t0 + Duration::from_secs(61));
    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].id, "den._rootstream._tcp.local");
    assert!(registry.snapshot().is_empty());
}

#[test]
fn test_refresh_extends_lifetime() {
    let registry = DiscoveryRegistry::new();
    let t0 = Instant::now();
    registry.upsert_at(sighting("den"), t0);
    assert_eq!(
        registry.upsert_at(sighting("den"), t0 + Duration::from_secs(50)),
        Upsert::Refreshed
    );

    assert!(registry.evict_stale_at(t0 + Duration::from_secs(100)).is_empty());
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_manual_peer_never_evicted() {
    let registry = DiscoveryRegistry::new();
    let t0 = Instant::now();
    let manual = registry.add_manual("Attic", "192.168.0.50", 8000);
    registry.upsert_at(sighting("den"), t0);

    registry.evict_stale_at(t0 + Duration::from_secs(24 * 3600));

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, manual.id);
    assert!(snapshot[0].is_manual);
}

#[test]
fn test_manual_peer_can_be_removed() {
    let registry = DiscoveryRegistry::new();
    let manual = registry.add_manual("Attic", "192.168.0.50", 8000);
    assert!(registry.remove(&manual.id).is_some());
    assert!(registry.remove(&manual.id).is_none());
    assert!(registry.is_empty());
}

#[test]
fn test_ids_unique() {
    let registry = DiscoveryRegistry::new();
    for _ in 0..5 {
        registry.upsert(sighting("den"));
        registry.add_manual("Attic", "192.168.0.50", 8000);
    }
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn test_snapshot_watch_publishes_mutations() {
    let registry = DiscoveryRegistry::new();
    let mut rx = registry.subscribe();

    registry.upsert(sighting("den"));
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().len(), 1);

    registry.remove("den._rootstream._tcp.local");
    rx.changed().await.unwrap();
    assert!(rx.borrow().is_empty());
}

#[tokio::test]
async fn test_consumer_applies_events() {
    let registry = Arc::new(DiscoveryRegistry::new());
    let (tx, rx) = mpsc::channel(16);
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut snapshots = registry.subscribe();

    let consumer = tokio::spawn(run_consumer(
        registry.clone(),
        rx,
        Duration::from_secs(5),
        stop_rx,
    ));

    tx.send(DiscoveryEvent::Sighted(sighting("b-host"))).await.unwrap();
    tx.send(DiscoveryEvent::Sighted(sighting("a-host"))).await.unwrap();

    timeout(Duration::from_secs(5), async {
        while snapshots.borrow_and_update().len() < 2 {
            snapshots.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    let names: Vec<_> = registry.snapshot().iter().map(|p| p.name.clone()).collect();
    assert_eq!(names, vec!["a-host", "b-host"]);

    tx.send(DiscoveryEvent::Removed("a-host._rootstream._tcp.local".into()))
        .await
        .unwrap();
    timeout(Duration::from_secs(5), async {
        while snapshots.borrow_and_update().len() != 1 {
            snapshots.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    stop_tx.send(true).unwrap();
    timeout(Duration::from_secs(5), consumer).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_service_without_mdns() {
    let service = DiscoveryService::new(DiscoveryConfig {
        mdns: false,
        ..Default::default()
    });
    service.start().unwrap();
    service.start().unwrap();

    service
        .sender()
        .send(DiscoveryEvent::Sighted(sighting("den")))
        .await
        .unwrap();
    service.add_manual("Attic", "10.1.1.1", 8000);

    let mut snapshots = service.registry().subscribe();
    timeout(Duration::from_secs(5), async {
        while snapshots.borrow_and_update().len() < 2 {
            snapshots.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    service.stop().await;
    assert_eq!(service.peers().len(), 2);
}
