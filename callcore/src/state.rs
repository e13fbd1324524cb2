//! Call state machine implementation.

use chrono::{DateTime, Utc};
use log::{debug, trace};
use serde::Serialize;
use std::fmt;

use crate::candidates::CandidateBuffer;
use crate::types::{IceCandidate, MediaStream, PeerId, Role, SessionId};

/// Lifecycle phase observed by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum Phase {
    /// No session.
    #[default]
    Idle,
    /// Outgoing call: offer sent, waiting for the answer.
    Calling,
    /// Incoming call: offer applied, waiting for the local decision.
    RingingIncoming,
    /// Local media attached, descriptions being exchanged.
    Negotiating,
    /// Remote media received.
    Connected,
}

impl Phase {
    pub fn can_accept(self) -> bool {
        self == Self::RingingIncoming
    }

    pub fn can_reject(self) -> bool {
        self == Self::RingingIncoming
    }

    pub fn awaiting_answer(self) -> bool {
        self == Self::Calling
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Calling => "calling",
            Self::RingingIncoming => "ringing",
            Self::Negotiating => "negotiating",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Non-terminal transitions. Terminal transitions drop the session instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTransition {
    LocalAccepted,
    AnswerApplied,
    RemoteMediaReceived,
}

/// The single active or pending negotiation.
///
/// Owns the negotiation bookkeeping only. The transport connection itself is
/// owned by the session worker in the runtime crate.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub id: SessionId,
    pub role: Role,
    pub remote: PeerId,
    pub phase: Phase,
    pub connected_at: Option<DateTime<Utc>>,
    remote_description_set: bool,
    candidates: CandidateBuffer,
    remote_media: Option<MediaStream>,
}

impl CallSession {
    pub fn new_outgoing(id: SessionId, remote: PeerId) -> Self {
        Self::new(id, Role::Caller, remote, Phase::Calling)
    }

    pub fn new_incoming(id: SessionId, remote: PeerId) -> Self {
        Self::new(id, Role::Callee, remote, Phase::RingingIncoming)
    }

    fn new(id: SessionId, role: Role, remote: PeerId, phase: Phase) -> Self {
        Self {
            id,
            role,
            remote,
            phase,
            connected_at: None,
            remote_description_set: false,
            candidates: CandidateBuffer::new(),
            remote_media: None,
        }
    }

    pub fn is_caller(&self) -> bool {
        self.role == Role::Caller
    }

    /// Apply a state transition. Returns error if transition is invalid.
    pub fn apply_transition(&mut self, transition: CallTransition) -> Result<Phase, InvalidTransition> {
        let next = match (self.phase, transition) {
            (Phase::RingingIncoming, CallTransition::LocalAccepted) => Phase::Negotiating,
            (Phase::Calling, CallTransition::AnswerApplied) => Phase::Negotiating,
            (Phase::Negotiating, CallTransition::RemoteMediaReceived) => {
                self.connected_at = Some(Utc::now());
                Phase::Connected
            }
            (current, attempted) => {
                debug!(target: "Call/State", "Session {}: {attempted:?} refused in {current}", self.id);
                return Err(InvalidTransition {
                    current_state: format!("{current:?}"),
                    attempted: format!("{attempted:?}"),
                });
            }
        };
        debug!(target: "Call/State", "Session {}: {} -> {next}", self.id, self.phase);
        self.phase = next;
        Ok(next)
    }

    /// Routes a remote candidate: returns it back when it can be applied now,
    /// otherwise buffers it until the remote description is set.
    pub fn accept_candidate(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.remote_description_set {
            Some(candidate)
        } else {
            self.candidates.enqueue(candidate);
            trace!(
                target: "Call/State",
                "Session {}: holding remote candidate ({} waiting)",
                self.id,
                self.candidates.len()
            );
            None
        }
    }

    /// Marks the remote description as applied and hands every buffered
    /// candidate to `apply` in arrival order. Subsequent calls drain nothing.
    pub fn remote_description_applied<F>(&mut self, apply: F) -> usize
    where
        F: FnMut(IceCandidate),
    {
        self.remote_description_set = true;
        self.candidates.drain_into(apply)
    }

    pub fn buffered_candidates(&self) -> usize {
        self.candidates.len()
    }

    /// Records the remote stream. The phase moves to `Connected` only once the
    /// session is `Negotiating`; earlier arrivals are held until then.
    pub fn record_remote_media(&mut self, stream: MediaStream) -> bool {
        self.remote_media = Some(stream);
        self.settle_media()
    }

    /// Promotes a `Negotiating` session that already holds remote media.
    pub fn settle_media(&mut self) -> bool {
        if self.phase == Phase::Negotiating && self.remote_media.is_some() {
            return self
                .apply_transition(CallTransition::RemoteMediaReceived)
                .is_ok();
        }
        false
    }

    /// The remote stream, exposed only once connected.
    pub fn remote_media(&self) -> Option<&MediaStream> {
        match self.phase {
            Phase::Connected => self.remote_media.as_ref(),
            _ => None,
        }
    }

    /// Seconds spent connected, if the call ever connected.
    pub fn connected_secs(&self) -> Option<i64> {
        self.connected_at
            .map(|at| Utc::now().signed_duration_since(at).num_seconds())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

impl InvalidTransition {
    pub fn new(current: Phase, attempted: &str) -> Self {
        Self {
            current_state: format!("{current:?}"),
            attempted: attempted.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outgoing() -> CallSession {
        CallSession::new_outgoing(SessionId::new(1), "B".into())
    }

    fn incoming() -> CallSession {
        CallSession::new_incoming(SessionId::new(2), "A".into())
    }

    fn stream() -> MediaStream {
        MediaStream::audio("remote-stream", "remote-audio")
    }

    /// Flow: Calling → Negotiating → Connected
    #[test]
    fn test_outgoing_call_flow() {
        let mut call = outgoing();
        assert_eq!(call.phase, Phase::Calling);
        assert!(call.is_caller());

        call.apply_transition(CallTransition::AnswerApplied).unwrap();
        assert_eq!(call.phase, Phase::Negotiating);

        assert!(call.record_remote_media(stream()));
        assert_eq!(call.phase, Phase::Connected);
        assert!(call.connected_at.is_some());
        assert_eq!(call.remote_media(), Some(&stream()));
    }

    /// Flow: RingingIncoming → Negotiating → Connected
    #[test]
    fn test_incoming_call_flow() {
        let mut call = incoming();
        assert!(call.phase.can_accept());

        call.apply_transition(CallTransition::LocalAccepted).unwrap();
        assert_eq!(call.phase, Phase::Negotiating);

        call.apply_transition(CallTransition::RemoteMediaReceived)
            .unwrap();
        assert_eq!(call.phase, Phase::Connected);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut call = outgoing();

        // Callers never accept
        assert!(call.apply_transition(CallTransition::LocalAccepted).is_err());
        // Media before the answer is not a transition
        assert!(
            call.apply_transition(CallTransition::RemoteMediaReceived)
                .is_err()
        );
        assert_eq!(call.phase, Phase::Calling);

        let mut call = incoming();
        let err = call
            .apply_transition(CallTransition::AnswerApplied)
            .unwrap_err();
        assert_eq!(err.current_state, "RingingIncoming");
        assert_eq!(err.attempted, "AnswerApplied");
    }

    #[test]
    fn test_early_remote_media_is_held_until_negotiating() {
        let mut call = incoming();

        assert!(!call.record_remote_media(stream()));
        assert_eq!(call.phase, Phase::RingingIncoming);
        assert_eq!(call.remote_media(), None);

        call.apply_transition(CallTransition::LocalAccepted).unwrap();
        assert!(call.settle_media());
        assert_eq!(call.phase, Phase::Connected);
    }

    #[test]
    fn test_candidates_buffer_until_remote_description() {
        let mut call = outgoing();
        assert!(call.accept_candidate(IceCandidate::new("c1")).is_none());
        assert!(call.accept_candidate(IceCandidate::new("c2")).is_none());
        assert_eq!(call.buffered_candidates(), 2);

        let mut applied = Vec::new();
        assert_eq!(call.remote_description_applied(|c| applied.push(c)), 2);
        assert_eq!(
            applied,
            vec![IceCandidate::new("c1"), IceCandidate::new("c2")]
        );

        // Once the remote description is set, candidates pass straight through.
        assert_eq!(
            call.accept_candidate(IceCandidate::new("c3")),
            Some(IceCandidate::new("c3"))
        );
        assert_eq!(call.remote_description_applied(|_| panic!("drained twice")), 0);
    }
}
