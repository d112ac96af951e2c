//! RootStream Core
//!
//! Wire-level types and protocol primitives shared by every RootStream
//! client crate.
//!
//! This crate provides:
//! - Stream packets and their binary encoding ([`StreamPacket`], [`packet`])
//! - Media sub-headers carried inside packets ([`VideoFrameDescriptor`],
//!   [`AudioFrameDescriptor`], [`InputEvent`])
//! - Session authentication and AEAD sealing ([`SecuritySession`])
//! - Timing utilities ([`time`])

pub mod error;
pub mod media;
pub mod packet;
pub mod security;
pub mod time;

pub use error::{CryptoError, Error, InvalidPacket, Result};
pub use media::{
    AudioFrameDescriptor, InputEvent, InputKind, VideoCodec, VideoFormat, VideoFrameDescriptor,
};
pub use packet::{decode, encode, PacketType, StreamPacket, HEADER_SIZE};
pub use security::{
    AuthBackend, AuthGrant, Credentials, SecuritySession, SessionKeys, SessionToken,
    StaticAuthBackend, SymmetricKey,
};

/// Default host port when an advertisement does not carry one
pub const DEFAULT_PORT: u16 = 8000;

/// mDNS service type advertised by RootStream hosts
pub const MDNS_SERVICE_TYPE: &str = "_rootstream._tcp.local.";
