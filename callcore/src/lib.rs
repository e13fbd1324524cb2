pub mod candidates;
pub mod error;
pub mod events;
pub mod platform;
pub mod protocol;
pub mod registry;
pub mod state;
pub mod types;

pub use candidates::CandidateBuffer;
pub use error::{CallError, PlatformError};
pub use events::{CallEvent, CallView, CoreEventBus, EventHandler, Notice};
pub use platform::{ConnectionFactory, ConnectionObserver, MediaSource, PeerConnection};
pub use protocol::{DecodeError, InboundSignal, OutboundSignal, SignalKind};
pub use registry::PeerRegistry;
pub use state::{CallSession, CallTransition, InvalidTransition, Phase};
pub use types::{
    IceCandidate, MediaStream, MediaTrack, PeerId, Role, SdpKind, SessionDescription, SessionId,
    TrackKind,
};
