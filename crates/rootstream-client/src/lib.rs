//! RootStream Client
//!
//! The client streaming engine: connection state machine, decode/present
//! pipeline and link metrics.
//!
//! # Example
//!
//! ```ignore
//! use rootstream_client::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = Arc::new(StaticAuthBackend::new().with_user("alice", "hunter2"));
//!     let security = Arc::new(SecuritySession::new(backend));
//!     security.authenticate(&Credentials::new("alice", "hunter2"))?;
//!
//!     let ctx = ClientContext::new(security);
//!     let session = TransportSession::builder().build(&ctx);
//!
//!     let peer = Peer::manual("desk", "192.168.1.20", 8000);
//!     let mut states = session.connect(&peer).await?;
//!
//!     session.send(&InputEvent::key(0x41, true)).await?;
//!
//!     while states.changed().await.is_ok() {
//!         println!("{}", *states.borrow());
//!     }
//!     Ok(())
//! }
//! ```

pub mod backends;
pub mod builder;
pub mod context;
pub mod decoder;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod session;
pub mod state;

pub use backends::{
    ChannelAudioRenderer, NullAudioRenderer, PassthroughVideoDecoder, PcmAudioDecoder, PcmFormat,
};
pub use builder::{SessionConfig, TransportSessionBuilder};
pub use context::ClientContext;
pub use decoder::{
    AudioDecoder, AudioRenderer, DecodedFrame, PcmBuffer, VideoDecodeSession, VideoDecoder,
};
pub use error::{ClientError, DecodeError, Result};
pub use metrics::{LinkMetrics, LinkMetricsSample};
pub use pipeline::{DecodePipeline, FrameQueue, PipelineConfig, PipelineStats, PresentationQueue};
pub use session::{SessionStats, TransportSession};
pub use state::ConnectionState;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::{SessionConfig, TransportSessionBuilder};
    pub use crate::context::ClientContext;
    pub use crate::error::{ClientError, Result};
    pub use crate::session::TransportSession;
    pub use crate::state::ConnectionState;
    pub use rootstream_core::{
        Credentials, InputEvent, SecuritySession, StaticAuthBackend, StreamPacket,
    };
    pub use rootstream_discovery::Peer;
}
