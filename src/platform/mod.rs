//! Media platforms the engine can run on.

pub mod loopback;
pub mod webrtc;

pub use loopback::LoopbackPlatform;
pub use webrtc::WebRtcPlatform;

use crate::config::{ClientConfig, PlatformKind};
use callcore::{ConnectionFactory, MediaSource};
use std::sync::Arc;

/// The two halves of a platform, as the engine consumes them.
#[derive(Clone)]
pub struct Platform {
    pub media: Arc<dyn MediaSource>,
    pub connections: Arc<dyn ConnectionFactory>,
}

impl Platform {
    pub fn new<P>(platform: P) -> Self
    where
        P: MediaSource + ConnectionFactory + 'static,
    {
        let platform = Arc::new(platform);
        Self {
            media: platform.clone(),
            connections: platform,
        }
    }

    pub fn from_config(config: &ClientConfig, local_id: &str) -> Self {
        match config.platform {
            PlatformKind::Webrtc => Self::new(WebRtcPlatform::new(local_id, &config.ice_servers)),
            PlatformKind::Loopback => Self::new(LoopbackPlatform::new(local_id)),
        }
    }
}
