//! Relay wire format.
//!
//! Every frame is a JSON text message `{"event": "<name>", "data": <payload>}`.
//! Outbound payloads carry the routing key `target`; the relay rewrites it to
//! `sender` when forwarding.

use crate::error::CallError;
use crate::types::{IceCandidate, PeerId, SdpKind, SessionDescription};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Inbound event names a channel handler can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    PeerList,
    Offer,
    Answer,
    IceCandidate,
    CallRejected,
    CallEnded,
}

impl SignalKind {
    pub const ALL: [SignalKind; 6] = [
        SignalKind::PeerList,
        SignalKind::Offer,
        SignalKind::Answer,
        SignalKind::IceCandidate,
        SignalKind::CallRejected,
        SignalKind::CallEnded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerList => "peer-list",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::CallRejected => "call-rejected",
            Self::CallEnded => "call-ended",
        }
    }

    pub fn from_event(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundSignal {
    Register {
        #[serde(rename = "userId")]
        user_id: PeerId,
    },
    Offer {
        target: PeerId,
        offer: SessionDescription,
    },
    Answer {
        target: PeerId,
        answer: SessionDescription,
    },
    IceCandidate {
        target: PeerId,
        candidate: IceCandidate,
    },
    CallRejected {
        target: PeerId,
    },
    CallEnded {
        target: PeerId,
    },
}

impl OutboundSignal {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::CallRejected { .. } => "call-rejected",
            Self::CallEnded { .. } => "call-ended",
        }
    }

    pub fn target(&self) -> Option<&PeerId> {
        match self {
            Self::Register { .. } => None,
            Self::Offer { target, .. }
            | Self::Answer { target, .. }
            | Self::IceCandidate { target, .. }
            | Self::CallRejected { target }
            | Self::CallEnded { target } => Some(target),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundSignal {
    PeerList(Vec<PeerId>),
    Offer {
        sender: PeerId,
        offer: SessionDescription,
    },
    Answer {
        sender: Option<PeerId>,
        answer: SessionDescription,
    },
    IceCandidate {
        sender: Option<PeerId>,
        candidate: IceCandidate,
    },
    CallRejected {
        target: Option<PeerId>,
        sender: Option<PeerId>,
    },
    CallEnded {
        target: PeerId,
        sender: Option<PeerId>,
    },
}

impl InboundSignal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::PeerList(_) => SignalKind::PeerList,
            Self::Offer { .. } => SignalKind::Offer,
            Self::Answer { .. } => SignalKind::Answer,
            Self::IceCandidate { .. } => SignalKind::IceCandidate,
            Self::CallRejected { .. } => SignalKind::CallRejected,
            Self::CallEnded { .. } => SignalKind::CallEnded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame is not a signaling envelope: {0}")]
    Envelope(String),

    #[error("unknown event {0:?}")]
    UnknownEvent(String),

    /// The event name was recognised but its payload was not usable.
    #[error("{error}")]
    Malformed { kind: SignalKind, error: CallError },
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct OfferPayload {
    sender: PeerId,
    offer: Option<SessionDescription>,
}

#[derive(Deserialize)]
struct AnswerPayload {
    #[serde(default)]
    sender: Option<PeerId>,
    answer: Option<SessionDescription>,
}

#[derive(Deserialize)]
struct CandidatePayload {
    #[serde(default)]
    sender: Option<PeerId>,
    candidate: Option<IceCandidate>,
}

#[derive(Deserialize, Default)]
struct RejectedPayload {
    #[serde(default)]
    target: Option<PeerId>,
    #[serde(default)]
    sender: Option<PeerId>,
}

#[derive(Deserialize)]
struct EndedPayload {
    target: PeerId,
    #[serde(default)]
    sender: Option<PeerId>,
}

/// Decodes one relay frame.
pub fn decode(text: &str) -> Result<InboundSignal, DecodeError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| DecodeError::Envelope(e.to_string()))?;
    let kind = SignalKind::from_event(&envelope.event)
        .ok_or_else(|| DecodeError::UnknownEvent(envelope.event.clone()))?;

    decode_payload(kind, envelope.data).map_err(|error| DecodeError::Malformed { kind, error })
}

fn decode_payload(kind: SignalKind, data: Value) -> Result<InboundSignal, CallError> {
    let event = kind.as_str();
    let signal = match kind {
        SignalKind::PeerList => InboundSignal::PeerList(parse(event, data)?),
        SignalKind::Offer => {
            let payload: OfferPayload = parse(event, data)?;
            if payload.sender.is_empty() {
                return Err(CallError::malformed(event, "empty sender"));
            }
            let offer = require_description(event, payload.offer, SdpKind::Offer)?;
            InboundSignal::Offer {
                sender: payload.sender,
                offer,
            }
        }
        SignalKind::Answer => {
            let payload: AnswerPayload = parse(event, data)?;
            let answer = require_description(event, payload.answer, SdpKind::Answer)?;
            InboundSignal::Answer {
                sender: payload.sender,
                answer,
            }
        }
        SignalKind::IceCandidate => {
            let payload: CandidatePayload = parse(event, data)?;
            let candidate = payload
                .candidate
                .ok_or_else(|| CallError::malformed(event, "missing candidate"))?;
            InboundSignal::IceCandidate {
                sender: payload.sender,
                candidate,
            }
        }
        SignalKind::CallRejected => {
            let payload: RejectedPayload = if data.is_null() {
                RejectedPayload::default()
            } else {
                parse(event, data)?
            };
            InboundSignal::CallRejected {
                target: payload.target,
                sender: payload.sender,
            }
        }
        SignalKind::CallEnded => {
            let payload: EndedPayload = parse(event, data)?;
            InboundSignal::CallEnded {
                target: payload.target,
                sender: payload.sender,
            }
        }
    };
    Ok(signal)
}

fn parse<T: for<'de> Deserialize<'de>>(event: &'static str, data: Value) -> Result<T, CallError> {
    serde_json::from_value(data).map_err(|e| CallError::malformed(event, e.to_string()))
}

fn require_description(
    event: &'static str,
    desc: Option<SessionDescription>,
    expected: SdpKind,
) -> Result<SessionDescription, CallError> {
    let desc = desc.ok_or_else(|| CallError::malformed(event, "missing description"))?;
    if desc.kind != expected {
        return Err(CallError::malformed(
            event,
            format!("expected {expected} description, got {}", desc.kind),
        ));
    }
    if desc.sdp.trim().is_empty() {
        return Err(CallError::malformed(event, "empty sdp"));
    }
    Ok(desc)
}
