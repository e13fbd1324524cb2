use crate::error::CallError;
use crate::state::Phase;
use crate::types::{MediaStream, PeerId};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Snapshot of everything the presentation layer renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallView {
    pub local_id: PeerId,
    pub phase: Phase,
    pub peers: Vec<PeerId>,
    pub selected_target: Option<PeerId>,
    /// Peer bound to the current session, in any non-idle phase.
    pub remote_peer: Option<PeerId>,
    /// Set only while `RingingIncoming`.
    pub incoming_call_from: Option<PeerId>,
    /// Set only while `Connected`.
    pub remote_media_stream: Option<MediaStream>,
    pub channel_available: bool,
    pub local_media_ready: bool,
}

impl CallView {
    pub fn idle(local_id: PeerId) -> Self {
        Self {
            local_id,
            phase: Phase::Idle,
            peers: Vec::new(),
            selected_target: None,
            remote_peer: None,
            incoming_call_from: None,
            remote_media_stream: None,
            channel_available: false,
            local_media_ready: false,
        }
    }
}

/// One-shot informational messages, independent of the phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Notice {
    CallRejected { by: PeerId },
    EndedByPeer { by: PeerId },
    /// An offer arrived while another session was active.
    AutoRejected { from: PeerId },
    /// The bound peer dropped off the relay mid-session.
    PeerLeft { peer: PeerId },
    CallEnded {
        with: PeerId,
        duration_secs: Option<i64>,
    },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CallRejected { .. } => f.write_str("Call was rejected."),
            Self::EndedByPeer { .. } => f.write_str("The other peer has ended the call."),
            Self::AutoRejected { from } => {
                write!(f, "Rejected incoming call from {from}: busy.")
            }
            Self::PeerLeft { peer } => write!(f, "{peer} went offline; call ended."),
            Self::CallEnded {
                with,
                duration_secs: Some(secs),
            } => write!(f, "Call with {with} ended after {}:{:02}.", secs / 60, secs % 60),
            Self::CallEnded { with, .. } => write!(f, "Call with {with} ended."),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged(CallView),
    Notice(Notice),
    Error(CallError),
}

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &CallEvent);
}

#[derive(Default, Clone)]
pub struct CoreEventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl CoreEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .push(handler);
    }

    pub fn has_handlers(&self) -> bool {
        !self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .is_empty()
    }

    /// Handlers run outside the lock, so one may register another; the new
    /// handler sees events from the next dispatch on.
    pub fn dispatch(&self, event: &CallEvent) {
        let handlers = self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .clone();
        for handler in handlers {
            handler.handle_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl EventHandler for Recorder {
        fn handle_event(&self, event: &CallEvent) {
            let line = match event {
                CallEvent::StateChanged(view) => format!("state:{}", view.phase),
                CallEvent::Notice(notice) => format!("notice:{notice}"),
                CallEvent::Error(err) => format!("error:{err}"),
            };
            self.0.lock().unwrap().push(line);
        }
    }

    #[test]
    fn test_dispatch_reaches_every_handler() {
        let bus = CoreEventBus::new();
        assert!(!bus.has_handlers());

        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        bus.add_handler(first.clone());
        bus.add_handler(second.clone());

        bus.dispatch(&CallEvent::Notice(Notice::CallRejected { by: "B".into() }));

        assert_eq!(*first.0.lock().unwrap(), vec!["notice:Call was rejected."]);
        assert_eq!(*second.0.lock().unwrap(), vec!["notice:Call was rejected."]);
    }

    /// Registers a recorder on the bus the first time it sees an event.
    struct Subscriber {
        bus: CoreEventBus,
        late: Arc<Recorder>,
        joined: Mutex<bool>,
    }

    impl EventHandler for Subscriber {
        fn handle_event(&self, _event: &CallEvent) {
            let mut joined = self.joined.lock().unwrap();
            if !*joined {
                *joined = true;
                self.bus.add_handler(self.late.clone());
            }
        }
    }

    #[test]
    fn test_handler_may_register_another_during_dispatch() {
        let bus = CoreEventBus::new();
        let late = Arc::new(Recorder::default());
        bus.add_handler(Arc::new(Subscriber {
            bus: bus.clone(),
            late: late.clone(),
            joined: Mutex::new(false),
        }));

        bus.dispatch(&CallEvent::Notice(Notice::CallRejected { by: "B".into() }));
        assert!(late.0.lock().unwrap().is_empty());

        bus.dispatch(&CallEvent::Notice(Notice::EndedByPeer { by: "B".into() }));
        assert_eq!(
            *late.0.lock().unwrap(),
            vec!["notice:The other peer has ended the call."]
        );
    }

    #[test]
    fn test_view_serializes_camel_case() {
        let mut view = CallView::idle("A".into());
        view.incoming_call_from = Some("B".into());
        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(value["localId"], "A");
        assert_eq!(value["incomingCallFrom"], "B");
        assert_eq!(value["phase"], "Idle");
        assert!(value["remoteMediaStream"].is_null());
    }

    #[test]
    fn test_call_duration_notice() {
        let notice = Notice::CallEnded {
            with: "B".into(),
            duration_secs: Some(75),
        };
        assert_eq!(notice.to_string(), "Call with B ended after 1:15.");
    }
}
