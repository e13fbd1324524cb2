// Shared harness: clients on an in-memory relay with loopback media.
#![allow(dead_code)]

use peercall::callcore::{CallError, CallEvent, CallView, CoreEventBus, EventHandler, Notice, Phase};
use peercall::platform::{LoopbackPlatform, Platform};
use peercall::transport::MemoryRelay;
use peercall::{CallEngine, Client};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
pub struct Recorder(Mutex<Vec<CallEvent>>);

impl EventHandler for Recorder {
    fn handle_event(&self, event: &CallEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

impl Recorder {
    pub fn notices(&self) -> Vec<Notice> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                CallEvent::Notice(n) => Some(n.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<CallError> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                CallEvent::Error(err) => Some(err.clone()),
                _ => None,
            })
            .collect()
    }
}

pub struct TestPeer {
    pub name: &'static str,
    pub client: Arc<Client>,
    pub platform: LoopbackPlatform,
    pub events: Arc<Recorder>,
}

impl TestPeer {
    pub fn engine(&self) -> &CallEngine {
        self.client.engine()
    }

    pub fn view(&self) -> CallView {
        self.engine().view()
    }

    pub async fn wait_for(&self, what: &str, condition: impl FnMut(&CallView) -> bool) -> CallView {
        let mut views = self.engine().subscribe();
        let view = tokio::time::timeout(Duration::from_secs(5), views.wait_for(condition))
            .await
            .unwrap_or_else(|_| panic!("{}: timed out waiting for {what}", self.name))
            .expect("engine stopped")
            .clone();
        view
    }

    pub async fn wait_for_phase(&self, phase: Phase) -> CallView {
        self.wait_for(&format!("phase {phase}"), |v| v.phase == phase)
            .await
    }
}

pub async fn spawn_peer(
    relay: &Arc<MemoryRelay>,
    name: &'static str,
    platform: LoopbackPlatform,
) -> TestPeer {
    let events = Arc::new(Recorder::default());
    let bus = CoreEventBus::new();
    bus.add_handler(events.clone());
    let client = Client::new(
        name.into(),
        Arc::new(relay.factory()),
        Platform::new(platform.clone()),
        bus,
    );
    client.connect().await.expect("connect to memory relay");
    let peer = TestPeer {
        name,
        client,
        platform,
        events,
    };
    peer.wait_for("relay and media", |v| v.channel_available && v.local_media_ready)
        .await;
    eventually("registration", || {
        relay.registered().iter().any(|p| p == name)
    })
    .await;
    peer
}

/// Two registered clients that can see each other.
pub async fn pair(relay: &Arc<MemoryRelay>) -> (TestPeer, TestPeer) {
    let alice = spawn_peer(relay, "alice", LoopbackPlatform::new("alice")).await;
    let bob = spawn_peer(relay, "bob", LoopbackPlatform::new("bob")).await;
    alice
        .wait_for("bob online", |v| v.peers.iter().any(|p| p == "bob"))
        .await;
    bob.wait_for("alice online", |v| v.peers.iter().any(|p| p == "alice"))
        .await;
    (alice, bob)
}

/// Drives `caller` and `callee` to `Connected`.
pub async fn establish(caller: &TestPeer, callee: &TestPeer) {
    caller
        .engine()
        .select_target(callee.name)
        .await
        .expect("select");
    caller.engine().initiate_call().await.expect("initiate");
    callee.wait_for_phase(Phase::RingingIncoming).await;
    callee.engine().accept_call().await.expect("accept");
    caller.wait_for_phase(Phase::Connected).await;
    callee.wait_for_phase(Phase::Connected).await;
}

pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Lets queued inputs settle when asserting that nothing happens.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

pub fn offer_frame(sender: &str) -> String {
    serde_json::json!({
        "event": "offer",
        "data": {
            "sender": sender,
            "offer": { "type": "offer", "sdp": "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\n" }
        }
    })
    .to_string()
}

pub fn candidate_frame(sender: &str, candidate: &str) -> String {
    serde_json::json!({
        "event": "ice-candidate",
        "data": {
            "sender": sender,
            "candidate": { "candidate": candidate, "sdpMid": "0", "sdpMLineIndex": 0 }
        }
    })
    .to_string()
}
