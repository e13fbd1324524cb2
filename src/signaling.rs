//! Signaling channel: typed events over a relay transport.

use crate::error::SignalingError;
use crate::transport::{RelayTransport, TransportEvent, TransportFactory};
use callcore::protocol::{self, DecodeError};
use callcore::{CallError, InboundSignal, OutboundSignal, PeerId, SignalKind};
use dashmap::DashMap;
use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

/// Receives one decoded event, or the decode failure of a frame carrying
/// that event name.
pub type SignalHandler = Arc<dyn Fn(Result<InboundSignal, CallError>) + Send + Sync>;
pub type StatusHandler = Arc<dyn Fn(ChannelStatus) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connected,
    Disconnected,
}

struct Link {
    generation: u64,
    transport: Arc<dyn RelayTransport>,
    outbound: mpsc::UnboundedSender<String>,
}

/// Shared by the read and write pumps of one link. Whichever pump stops
/// first reports the loss; the other finds `lost` already set.
struct PumpGuard {
    generation: u64,
    lost: AtomicBool,
}

pub struct SignalingChannel {
    local_id: PeerId,
    handlers: DashMap<SignalKind, SignalHandler>,
    status_handler: RwLock<Option<StatusHandler>>,
    link: Mutex<Option<Link>>,
    connected: AtomicBool,
    next_generation: AtomicU64,
}

impl SignalingChannel {
    pub fn new(local_id: PeerId) -> Arc<Self> {
        Arc::new(Self {
            local_id,
            handlers: DashMap::new(),
            status_handler: RwLock::new(None),
            link: Mutex::new(None),
            connected: AtomicBool::new(false),
            next_generation: AtomicU64::new(1),
        })
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Registers the handler for one event name, replacing any previous one.
    pub fn on_event<F>(&self, kind: SignalKind, handler: F)
    where
        F: Fn(Result<InboundSignal, CallError>) + Send + Sync + 'static,
    {
        if self.handlers.insert(kind, Arc::new(handler)).is_some() {
            debug!(target: "Signaling", "Replaced handler for {kind}");
        }
    }

    pub fn on_status<F>(&self, handler: F)
    where
        F: Fn(ChannelStatus) + Send + Sync + 'static,
    {
        *self
            .status_handler
            .write()
            .expect("RwLock should not be poisoned") = Some(Arc::new(handler));
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queues a signal for the relay. Never waits on the network.
    pub fn send(&self, signal: OutboundSignal) -> Result<(), CallError> {
        if !self.is_connected() {
            return Err(CallError::ChannelUnavailable);
        }
        let frame = signal.encode().map_err(|e| {
            warn!(target: "Signaling", "Failed to encode {}: {e}", signal.event_name());
            CallError::ChannelUnavailable
        })?;
        let link = self.link.lock().unwrap_or_else(|p| p.into_inner());
        let outbound = &link.as_ref().ok_or(CallError::ChannelUnavailable)?.outbound;
        outbound
            .send(frame)
            .map_err(|_| CallError::ChannelUnavailable)?;
        trace!(target: "Signaling", "Queued {}", signal.event_name());
        Ok(())
    }

    /// Opens the relay transport, registers the local id and starts pumping
    /// inbound frames to the registered handlers.
    pub async fn connect(self: &Arc<Self>, factory: &dyn TransportFactory) -> Result<(), SignalingError> {
        if self.link.lock().unwrap_or_else(|p| p.into_inner()).is_some() {
            return Err(SignalingError::AlreadyConnected);
        }

        let (transport, events) = factory.create_transport().await?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let guard = Arc::new(PumpGuard {
            generation: self.next_generation.fetch_add(1, Ordering::SeqCst),
            lost: AtomicBool::new(false),
        });

        *self.link.lock().unwrap_or_else(|p| p.into_inner()) = Some(Link {
            generation: guard.generation,
            transport: Arc::clone(&transport),
            outbound: outbound_tx,
        });

        tokio::spawn(Arc::clone(self).write_pump(Arc::clone(&guard), transport, outbound_rx));
        tokio::spawn(Arc::clone(self).read_pump(guard, events));
        Ok(())
    }

    pub async fn disconnect(&self) {
        let link = self.link.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(link) = link {
            info!(target: "Signaling", "Disconnecting from relay");
            self.connected.store(false, Ordering::SeqCst);
            link.transport.disconnect().await;
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.link
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|link| link.generation == generation)
    }

    async fn read_pump(self: Arc<Self>, guard: Arc<PumpGuard>, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected if self.is_current(guard.generation) => {
                    self.handle_connected()
                }
                TransportEvent::Connected => {
                    debug!(target: "Signaling", "Ignoring connect of replaced link {}", guard.generation)
                }
                TransportEvent::FrameReceived(frame) => self.dispatch_frame(&frame),
                TransportEvent::Disconnected => break,
            }
        }
        self.link_lost(&guard);
    }

    async fn write_pump(
        self: Arc<Self>,
        guard: Arc<PumpGuard>,
        transport: Arc<dyn RelayTransport>,
        mut outbound: mpsc::UnboundedReceiver<String>,
    ) {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = transport.send_text(frame).await {
                warn!(target: "Signaling", "Relay send failed: {e}");
                self.link_lost(&guard);
                transport.disconnect().await;
                break;
            }
        }
        trace!(target: "Signaling", "Write pump {} stopped", guard.generation);
    }

    /// Tears down the link the pumps of `guard` belong to and reports
    /// `Disconnected` once. A link already replaced by a newer connect is
    /// left alone.
    fn link_lost(&self, guard: &PumpGuard) {
        if guard.lost.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut link = self.link.lock().unwrap_or_else(|p| p.into_inner());
            match link.as_ref().map(|l| l.generation) {
                Some(current) if current != guard.generation => {
                    debug!(
                        target: "Signaling",
                        "Link {} stopped after being replaced by {current}", guard.generation
                    );
                    return;
                }
                Some(_) => {
                    link.take();
                }
                None => {}
            }
            self.connected.store(false, Ordering::SeqCst);
        }
        info!(target: "Signaling", "Relay connection lost");
        self.notify_status(ChannelStatus::Disconnected);
    }

    fn handle_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        let register = OutboundSignal::Register {
            user_id: self.local_id.clone(),
        };
        if let Err(e) = self.send(register) {
            warn!(target: "Signaling", "Failed to register as {}: {e}", self.local_id);
        } else {
            info!(target: "Signaling", "Registered as {}", self.local_id);
        }
        self.notify_status(ChannelStatus::Connected);
    }

    fn dispatch_frame(&self, frame: &str) {
        let (kind, result) = match protocol::decode(frame) {
            Ok(signal) => (signal.kind(), Ok(signal)),
            Err(DecodeError::Malformed { kind, error }) => {
                warn!(target: "Signaling", "{error}");
                (kind, Err(error))
            }
            Err(e) => {
                warn!(target: "Signaling", "Dropping frame: {e}");
                return;
            }
        };

        // Clone out of the map so a handler may re-register without deadlocking.
        let handler = self.handlers.get(&kind).map(|h| Arc::clone(h.value()));
        match handler {
            Some(handler) => handler(result),
            None => debug!(target: "Signaling", "No handler for {kind}"),
        }
    }

    fn notify_status(&self, status: ChannelStatus) {
        let handler = self
            .status_handler
            .read()
            .expect("RwLock should not be poisoned")
            .clone();
        if let Some(handler) = handler {
            handler(status);
        }
    }
}
