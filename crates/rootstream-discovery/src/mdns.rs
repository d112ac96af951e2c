//! mDNS/Bonjour discovery

use crate::{DiscoveryError, DiscoveryEvent, Peer, Result, Sighting};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How often the browse thread checks whether it should stop
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Split `_rootstream._tcp.local.` into (`_rootstream._tcp`, `local`)
pub fn split_service_type(service_type: &str) -> (String, String) {
    let trimmed = service_type.trim_end_matches('.');
    match trimmed.rsplit_once('.') {
        Some((ty, domain)) => (ty.to_string(), domain.to_string()),
        None => (trimmed.to_string(), "local".to_string()),
    }
}

/// Instance label of a full service name
pub fn instance_name(fullname: &str, service_type: &str) -> String {
    let fullname = fullname.trim_end_matches('.');
    let suffix = service_type.trim_end_matches('.');
    fullname
        .strip_suffix(suffix)
        .map(|s| s.trim_end_matches('.'))
        .unwrap_or(fullname)
        .to_string()
}

/// Peer id for a full service name
pub fn peer_id(fullname: &str, service_type: &str) -> String {
    let (ty, domain) = split_service_type(service_type);
    Peer::composite_id(&instance_name(fullname, service_type), &ty, &domain)
}

fn sighting_from_info(info: &ServiceInfo, service_type: &str) -> Sighting {
    let (ty, domain) = split_service_type(service_type);
    let instance = instance_name(info.get_fullname(), service_type);

    let port = match info.get_port() {
        0 => rootstream_core::DEFAULT_PORT,
        port => port,
    };

    let mut sighting = Sighting::new(
        instance,
        ty,
        domain,
        info.get_hostname().trim_end_matches('.'),
        port,
    );

    if let Some(name) = info.get_properties().get("name") {
        if let Some(val) = name.val() {
            sighting = sighting.with_name(String::from_utf8_lossy(val).to_string());
        }
    }

    let mut addresses: Vec<IpAddr> = info
        .get_addresses()
        .iter()
        .map(|addr| IpAddr::from(*addr))
        .collect();
    addresses.sort();
    for addr in addresses {
        sighting = sighting.with_address(addr);
    }

    sighting
}

/// A running mDNS browse. Stops when dropped.
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    service_type: String,
    stopped: bool,
}

impl MdnsBrowser {
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// Stop browsing and shut the daemon down
    pub fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        if let Err(e) = self.daemon.stop_browse(&self.service_type) {
            debug!("mDNS stop_browse: {}", e);
        }
        self.daemon
            .shutdown()
            .map_err(|e| DiscoveryError::Mdns(e.to_string()))?;
        info!("Stopped mDNS discovery for {}", self.service_type);
        Ok(())
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Browse for RootStream hosts, forwarding sightings and removals to `tx`
///
/// The daemon's event channel is drained on a blocking thread that exits when
/// the browser is stopped or `tx` is closed.
pub fn browse(service_type: &str, tx: mpsc::Sender<DiscoveryEvent>) -> Result<MdnsBrowser> {
    let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Mdns(e.to_string()))?;

    let receiver = daemon
        .browse(service_type)
        .map_err(|e| DiscoveryError::Mdns(e.to_string()))?;

    info!("Starting mDNS discovery for {}", service_type);

    let ty = service_type.to_string();
    std::thread::Builder::new()
        .name("rootstream-mdns".into())
        .spawn(move || loop {
            if tx.is_closed() {
                break;
            }

            let event = match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(event) => event,
                Err(_) if receiver.is_disconnected() => {
                    debug!("mDNS event channel closed");
                    break;
                }
                Err(_) => continue,
            };

            let forwarded = match event {
                ServiceEvent::ServiceResolved(info) => {
                    debug!("mDNS resolved: {}", info.get_fullname());
                    DiscoveryEvent::Sighted(sighting_from_info(&info, &ty))
                }
                ServiceEvent::ServiceRemoved(_, fullname) => {
                    debug!("mDNS removed: {}", fullname);
                    DiscoveryEvent::Removed(peer_id(&fullname, &ty))
                }
                ServiceEvent::SearchStopped(_) => {
                    debug!("mDNS search stopped");
                    break;
                }
                _ => continue,
            };

            if tx.blocking_send(forwarded).is_err() {
                break;
            }
        })
        .map_err(DiscoveryError::Io)?;

    Ok(MdnsBrowser {
        daemon,
        service_type: service_type.to_string(),
        stopped: false,
    })
}

/// Log-and-continue wrapper used by the discovery service
pub(crate) fn try_browse(service_type: &str, tx: mpsc::Sender<DiscoveryEvent>) -> Option<MdnsBrowser> {
    match browse(service_type, tx) {
        Ok(browser) => Some(browser),
        Err(e) => {
            warn!("mDNS discovery unavailable: {}", e);
            None
        }
    }
}
