//! Call-related error types.

use crate::state::InvalidTransition;
use crate::types::PeerId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Local capture failed or has not completed yet.
    #[error("local media unavailable: {0}")]
    MediaUnavailable(String),

    /// An inbound signal was missing required fields or did not decode.
    #[error("malformed {event} signal: {reason}")]
    MalformedSignal { event: &'static str, reason: String },

    #[error("signaling channel unavailable")]
    ChannelUnavailable,

    /// Termination or negotiation traffic for a session we are not in.
    #[error("stale {event} event ignored: {reason}")]
    StaleEvent { event: &'static str, reason: String },

    #[error("a call with {0} is already in progress")]
    ConcurrentSession(PeerId),

    #[error("no active call")]
    NoActiveSession,

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("no call target selected")]
    NoTargetSelected,

    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// A platform negotiation step (offer, answer, remote description) failed.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("call engine has stopped")]
    EngineStopped,
}

impl CallError {
    /// Whether the presentation layer should show this error to the user.
    ///
    /// Stale events are expected under normal relay interleaving and are only
    /// logged.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::StaleEvent { .. })
    }

    pub fn stale(event: &'static str, reason: impl Into<String>) -> Self {
        Self::StaleEvent {
            event,
            reason: reason.into(),
        }
    }

    pub fn malformed(event: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedSignal {
            event,
            reason: reason.into(),
        }
    }
}

/// Failure reported by a platform primitive (media capture or peer connection).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("media capture failed: {0}")]
    Media(String),

    #[error("connection setup failed: {0}")]
    Connection(String),

    #[error("negotiation step failed: {0}")]
    Negotiation(String),

    #[error("connection is closed")]
    Closed,
}

impl From<PlatformError> for CallError {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::Media(reason) => CallError::MediaUnavailable(reason),
            other => CallError::Negotiation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_events_are_not_user_visible() {
        assert!(!CallError::stale("call-ended", "addressed to C").is_user_visible());
        assert!(CallError::ChannelUnavailable.is_user_visible());
        assert!(CallError::malformed("answer", "missing sdp").is_user_visible());
    }

    #[test]
    fn test_platform_media_error_maps_to_media_unavailable() {
        let err: CallError = PlatformError::Media("permission denied".into()).into();
        assert_eq!(err, CallError::MediaUnavailable("permission denied".into()));

        let err: CallError = PlatformError::Closed.into();
        assert!(matches!(err, CallError::Negotiation(_)));
    }
}
