//! Peer representation

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Instant;

/// A reachable RootStream host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    /// Unique, stable identifier (`<instance>.<service type>.<domain>` or `manual:<host>:<port>`)
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Hostname as advertised
    pub hostname: String,
    /// Host port
    pub port: u16,
    /// Resolved addresses, if the advertisement carried any
    #[serde(default)]
    pub addresses: Vec<IpAddr>,
    /// Added by the user; never evicted
    pub is_manual: bool,
    /// Last advertisement
    #[serde(skip, default = "Instant::now")]
    pub last_seen: Instant,
}

impl Peer {
    /// A user-entered peer
    pub fn manual(name: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        let hostname = hostname.into();
        Self {
            id: Self::manual_id(&hostname, port),
            name: name.into(),
            hostname,
            port,
            addresses: Vec::new(),
            is_manual: true,
            last_seen: Instant::now(),
        }
    }

    pub fn manual_id(hostname: &str, port: u16) -> String {
        format!("manual:{}:{}", hostname, port)
    }

    /// Composite id for an advertised service instance
    pub fn composite_id(instance: &str, service_type: &str, domain: &str) -> String {
        format!(
            "{}.{}.{}",
            instance,
            service_type.trim_matches('.'),
            domain.trim_matches('.')
        )
    }

    /// Host to dial: the first resolved IPv4 address, then any address, then the hostname
    pub fn connect_host(&self) -> String {
        self.addresses
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| self.addresses.first())
            .map(|a| a.to_string())
            .unwrap_or_else(|| self.hostname.clone())
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.connect_host(), self.port)
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.hostname == other.hostname
            && self.port == other.port
            && self.addresses == other.addresses
            && self.is_manual == other.is_manual
    }
}

/// One advertisement of a service instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    pub instance: String,
    pub service_type: String,
    pub domain: String,
    /// Display name; the instance name if the host sent none
    pub name: Option<String>,
    pub hostname: String,
    pub port: u16,
    pub addresses: Vec<IpAddr>,
}

impl Sighting {
    pub fn new(
        instance: impl Into<String>,
        service_type: impl Into<String>,
        domain: impl Into<String>,
        hostname: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            instance: instance.into(),
            service_type: service_type.into(),
            domain: domain.into(),
            name: None,
            hostname: hostname.into(),
            port,
            addresses: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_address(mut self, addr: IpAddr) -> Self {
        self.addresses.push(addr);
        self
    }

    pub fn peer_id(&self) -> String {
        Peer::composite_id(&self.instance, &self.service_type, &self.domain)
    }

    pub(crate) fn into_peer(self, seen_at: Instant) -> Peer {
        Peer {
            id: self.peer_id(),
            name: self.name.unwrap_or_else(|| self.instance.clone()),
            hostname: self.hostname,
            port: self.port,
            addresses: self.addresses,
            is_manual: false,
            last_seen: seen_at,
        }
    }
}
