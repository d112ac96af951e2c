//! Client context
//!
//! Everything a session needs from the outside world, passed explicitly to
//! constructors: the transport connector, the security session, and the
//! decoder and renderer backends.

use rootstream_core::SecuritySession;
use rootstream_transport::{Connector, TcpConnector};
use std::sync::Arc;

use crate::backends::{NullAudioRenderer, PassthroughVideoDecoder, PcmAudioDecoder};
use crate::decoder::{AudioDecoder, AudioRenderer, VideoDecoder};

#[derive(Clone)]
pub struct ClientContext {
    connector: Arc<dyn Connector>,
    security: Arc<SecuritySession>,
    video_decoder: Arc<dyn VideoDecoder>,
    audio_decoder: Arc<dyn AudioDecoder>,
    audio_renderer: Arc<dyn AudioRenderer>,
}

impl ClientContext {
    /// TCP transport, passthrough video, s16le PCM audio and a discarding
    /// audio renderer
    pub fn new(security: Arc<SecuritySession>) -> Self {
        Self {
            connector: Arc::new(TcpConnector::default()),
            security,
            video_decoder: Arc::new(PassthroughVideoDecoder),
            audio_decoder: Arc::new(PcmAudioDecoder::default()),
            audio_renderer: Arc::new(NullAudioRenderer::default()),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_video_decoder(mut self, decoder: Arc<dyn VideoDecoder>) -> Self {
        self.video_decoder = decoder;
        self
    }

    pub fn with_audio_decoder(mut self, decoder: Arc<dyn AudioDecoder>) -> Self {
        self.audio_decoder = decoder;
        self
    }

    pub fn with_audio_renderer(mut self, renderer: Arc<dyn AudioRenderer>) -> Self {
        self.audio_renderer = renderer;
        self
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn security(&self) -> &Arc<SecuritySession> {
        &self.security
    }

    pub fn video_decoder(&self) -> &Arc<dyn VideoDecoder> {
        &self.video_decoder
    }

    pub fn audio_decoder(&self) -> &Arc<dyn AudioDecoder> {
        &self.audio_decoder
    }

    pub fn audio_renderer(&self) -> &Arc<dyn AudioRenderer> {
        &self.audio_renderer
    }
}
