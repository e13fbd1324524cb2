//! Seams to the real-time media stack.
//!
//! The engine never touches capture devices or network paths directly. A
//! platform supplies local media, creates connections and reports what those
//! connections produce through a [`ConnectionObserver`].

use crate::error::PlatformError;
use crate::types::{IceCandidate, MediaStream, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;

/// Access to the local capture device.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquires the local audio stream. Called once per engine.
    async fn acquire_local_media(&self) -> Result<MediaStream, PlatformError>;
}

/// Callbacks fired by a connection, possibly from foreign threads.
pub trait ConnectionObserver: Send + Sync {
    fn on_local_candidate(&self, candidate: IceCandidate);
    fn on_remote_media(&self, stream: MediaStream);
}

#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create_connection(
        &self,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Box<dyn PeerConnection>, PlatformError>;
}

/// One peer-to-peer connection. Owned by exactly one session.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn attach_local_media(&self, stream: &MediaStream) -> Result<(), PlatformError>;

    /// Produces an offer and installs it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, PlatformError>;

    /// Produces an answer and installs it as the local description.
    async fn create_answer(&self) -> Result<SessionDescription, PlatformError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PlatformError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PlatformError>;

    /// Releases the connection. Calling it more than once has no effect.
    async fn close(&self) -> Result<(), PlatformError>;
}
