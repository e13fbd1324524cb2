//! In-process relay.
//!
//! Behaves like the hosted relay: `register` binds a connection to a peer id
//! and broadcasts the `peer-list`; targeted events are forwarded to the
//! target's connection with the sender's id added to the payload.

use super::{RelayTransport, TransportEvent, TransportFactory};
use crate::error::SignalingError;
use async_trait::async_trait;
use callcore::PeerId;
use log::{debug, warn};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One frame the relay accepted from a client.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayRecord {
    pub from: Option<PeerId>,
    pub event: String,
    pub data: Value,
}

struct Connection {
    peer: Option<PeerId>,
    tx: mpsc::Sender<TransportEvent>,
}

#[derive(Default)]
struct RelayState {
    next_conn: u64,
    conns: BTreeMap<u64, Connection>,
    log: Vec<RelayRecord>,
}

type Delivery = (mpsc::Sender<TransportEvent>, TransportEvent);

#[derive(Default)]
pub struct MemoryRelay {
    state: Mutex<RelayState>,
}

impl MemoryRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn factory(self: &Arc<Self>) -> MemoryTransportFactory {
        MemoryTransportFactory {
            relay: Arc::clone(self),
        }
    }

    /// Every frame received so far, in arrival order.
    pub fn records(&self) -> Vec<RelayRecord> {
        self.lock().log.clone()
    }

    /// Frames with the given event name sent by `from`.
    pub fn sent_by(&self, from: &str, event: &str) -> Vec<RelayRecord> {
        self.lock()
            .log
            .iter()
            .filter(|r| r.event == event && r.from.as_ref().is_some_and(|p| p == from))
            .cloned()
            .collect()
    }

    pub fn registered(&self) -> Vec<PeerId> {
        self.lock()
            .conns
            .values()
            .filter_map(|c| c.peer.clone())
            .collect()
    }

    /// Pushes a raw frame to a registered peer, bypassing routing.
    pub async fn inject(&self, to: &str, frame: impl Into<String>) -> bool {
        let tx = self
            .lock()
            .conns
            .values()
            .find(|c| c.peer.as_ref().is_some_and(|p| p == to))
            .map(|c| c.tx.clone());
        match tx {
            Some(tx) => tx
                .send(TransportEvent::FrameReceived(frame.into()))
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Drops a peer's connection from the relay side.
    pub async fn kick(&self, peer: &str) {
        let conn = self
            .lock()
            .conns
            .iter()
            .find(|(_, c)| c.peer.as_ref().is_some_and(|p| p == peer))
            .map(|(id, _)| *id);
        if let Some(conn) = conn {
            self.remove(conn).await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open(&self) -> (u64, mpsc::Receiver<TransportEvent>, mpsc::Sender<TransportEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut state = self.lock();
        let conn = state.next_conn;
        state.next_conn += 1;
        state.conns.insert(
            conn,
            Connection {
                peer: None,
                tx: tx.clone(),
            },
        );
        (conn, rx, tx)
    }

    async fn route(&self, conn: u64, frame: String) -> Result<(), SignalingError> {
        let envelope: Value = serde_json::from_str(&frame)
            .map_err(|e| SignalingError::Rejected(format!("relay cannot parse frame: {e}")))?;
        let event = envelope["event"].as_str().unwrap_or_default().to_string();
        let data = envelope.get("data").cloned().unwrap_or(Value::Null);

        let deliveries = {
            let mut state = self.lock();
            let from = state
                .conns
                .get(&conn)
                .ok_or(SignalingError::Closed)?
                .peer
                .clone();
            state.log.push(RelayRecord {
                from: from.clone(),
                event: event.clone(),
                data: data.clone(),
            });

            if event == "register" {
                let Some(user_id) = data["userId"].as_str() else {
                    return Err(SignalingError::Rejected("register without userId".into()));
                };
                if let Some(c) = state.conns.get_mut(&conn) {
                    c.peer = Some(PeerId::from(user_id));
                }
                debug!(target: "Relay", "{user_id} registered");
                peer_list_deliveries(&state)
            } else {
                forward(&state, from, &event, data)
            }
        };

        deliver(deliveries).await;
        Ok(())
    }

    async fn remove(&self, conn: u64) {
        let deliveries = {
            let mut state = self.lock();
            let Some(removed) = state.conns.remove(&conn) else {
                return;
            };
            let mut deliveries = vec![(removed.tx, TransportEvent::Disconnected)];
            if removed.peer.is_some() {
                deliveries.extend(peer_list_deliveries(&state));
            }
            deliveries
        };
        deliver(deliveries).await;
    }
}

fn peer_list_deliveries(state: &RelayState) -> Vec<Delivery> {
    let ids: Vec<&PeerId> = state.conns.values().filter_map(|c| c.peer.as_ref()).collect();
    let frame = json!({"event": "peer-list", "data": ids}).to_string();
    state
        .conns
        .values()
        .filter(|c| c.peer.is_some())
        .map(|c| (c.tx.clone(), TransportEvent::FrameReceived(frame.clone())))
        .collect()
}

fn forward(state: &RelayState, from: Option<PeerId>, event: &str, mut data: Value) -> Vec<Delivery> {
    let Some(target) = data["target"].as_str().map(str::to_owned) else {
        warn!(target: "Relay", "dropping {event} without target");
        return Vec::new();
    };
    if let (Some(from), Some(obj)) = (from, data.as_object_mut()) {
        obj.insert("sender".into(), json!(from));
    }
    let frame = json!({"event": event, "data": data}).to_string();
    state
        .conns
        .values()
        .filter(|c| c.peer.as_ref().is_some_and(|p| p == target.as_str()))
        .map(|c| (c.tx.clone(), TransportEvent::FrameReceived(frame.clone())))
        .collect()
}

async fn deliver(deliveries: Vec<Delivery>) {
    for (tx, event) in deliveries {
        let _ = tx.send(event).await;
    }
}

pub struct MemoryTransport {
    relay: Arc<MemoryRelay>,
    conn: u64,
    closed: AtomicBool,
}

#[async_trait]
impl RelayTransport for MemoryTransport {
    async fn send_text(&self, frame: String) -> Result<(), SignalingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SignalingError::Closed);
        }
        self.relay.route(self.conn, frame).await
    }

    async fn disconnect(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.relay.remove(self.conn).await;
        }
    }
}

pub struct MemoryTransportFactory {
    relay: Arc<MemoryRelay>,
}

#[async_trait]
impl TransportFactory for MemoryTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn RelayTransport>, mpsc::Receiver<TransportEvent>), SignalingError> {
        let (conn, rx, tx) = self.relay.open();
        let transport = Arc::new(MemoryTransport {
            relay: Arc::clone(&self.relay),
            conn,
            closed: AtomicBool::new(false),
        });
        let _ = tx.send(TransportEvent::Connected).await;
        Ok((transport, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_frame(rx: &mut mpsc::Receiver<TransportEvent>) -> Value {
        loop {
            match rx.recv().await {
                Some(TransportEvent::FrameReceived(text)) => {
                    return serde_json::from_str(&text).unwrap();
                }
                Some(_) => continue,
                None => panic!("relay channel closed"),
            }
        }
    }

    #[tokio::test]
    async fn test_register_broadcasts_peer_list() {
        let relay = MemoryRelay::new();
        let factory = relay.factory();
        let (a, mut a_rx) = factory.create_transport().await.unwrap();
        let (b, mut b_rx) = factory.create_transport().await.unwrap();

        a.send_text(r#"{"event":"register","data":{"userId":"A"}}"#.into())
            .await
            .unwrap();
        assert_eq!(next_frame(&mut a_rx).await["data"], json!(["A"]));

        b.send_text(r#"{"event":"register","data":{"userId":"B"}}"#.into())
            .await
            .unwrap();
        assert_eq!(next_frame(&mut a_rx).await["data"], json!(["A", "B"]));
        assert_eq!(next_frame(&mut b_rx).await["data"], json!(["A", "B"]));
    }

    #[tokio::test]
    async fn test_forward_adds_sender() {
        let relay = MemoryRelay::new();
        let factory = relay.factory();
        let (a, _a_rx) = factory.create_transport().await.unwrap();
        let (b, mut b_rx) = factory.create_transport().await.unwrap();
        a.send_text(r#"{"event":"register","data":{"userId":"A"}}"#.into())
            .await
            .unwrap();
        b.send_text(r#"{"event":"register","data":{"userId":"B"}}"#.into())
            .await
            .unwrap();
        next_frame(&mut b_rx).await;

        a.send_text(r#"{"event":"call-ended","data":{"target":"B"}}"#.into())
            .await
            .unwrap();
        let frame = next_frame(&mut b_rx).await;
        assert_eq!(frame["event"], "call-ended");
        assert_eq!(frame["data"], json!({"target": "B", "sender": "A"}));
        assert_eq!(relay.sent_by("A", "call-ended").len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_rejects_sends() {
        let relay = MemoryRelay::new();
        let (a, mut a_rx) = relay.factory().create_transport().await.unwrap();
        assert_eq!(a_rx.recv().await, Some(TransportEvent::Connected));

        a.disconnect().await;
        a.disconnect().await;
        assert_eq!(a_rx.recv().await, Some(TransportEvent::Disconnected));
        assert!(matches!(
            a.send_text("{}".into()).await,
            Err(SignalingError::Closed)
        ));
    }
}
