//! One calling client: a relay connection plus the engine driving it.

use crate::calls::CallEngine;
use crate::config::ClientConfig;
use crate::error::SignalingError;
use crate::platform::Platform;
use crate::signaling::SignalingChannel;
use crate::transport::{TransportFactory, WebSocketTransportFactory};
use anyhow::Context;
use callcore::{CoreEventBus, EventHandler, PeerId};
use log::info;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub struct Client {
    local_id: PeerId,
    channel: Arc<SignalingChannel>,
    engine: CallEngine,
    engine_task: Mutex<Option<JoinHandle<()>>>,
    transport_factory: Arc<dyn TransportFactory>,
    is_connecting: AtomicBool,
}

impl Client {
    /// Starts the engine for `local_id`. The relay is not contacted until
    /// [`Client::connect`]. Must be called within a tokio runtime.
    pub fn new(
        local_id: PeerId,
        transport_factory: Arc<dyn TransportFactory>,
        platform: Platform,
        bus: CoreEventBus,
    ) -> Arc<Self> {
        let channel = SignalingChannel::new(local_id.clone());
        // Handlers must be in place before the first frame can arrive.
        let (engine, engine_task) =
            CallEngine::start(Arc::clone(&channel), platform.media, platform.connections, bus);
        Arc::new(Self {
            local_id,
            channel,
            engine,
            engine_task: Mutex::new(Some(engine_task)),
            transport_factory,
            is_connecting: AtomicBool::new(false),
        })
    }

    /// Client on the configured relay and platform.
    pub fn from_config(config: &ClientConfig, bus: CoreEventBus) -> Arc<Self> {
        let local_id = config.resolve_local_id();
        let platform = Platform::from_config(config, &local_id);
        let transport = Arc::new(WebSocketTransportFactory::new(config.relay_url.clone()));
        Self::new(local_id.into(), transport, platform, bus)
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn engine(&self) -> &CallEngine {
        &self.engine
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.engine.event_bus().add_handler(handler);
    }

    pub async fn connect(self: &Arc<Self>) -> Result<(), anyhow::Error> {
        if self.is_connecting.swap(true, Ordering::SeqCst) {
            return Err(SignalingError::AlreadyConnected.into());
        }

        let _guard = scopeguard::guard((), |_| {
            self.is_connecting.store(false, Ordering::Relaxed);
        });

        if self.is_connected() {
            return Err(SignalingError::AlreadyConnected.into());
        }

        info!(target: "Client", "Connecting to relay as {}", self.local_id);
        self.channel
            .connect(self.transport_factory.as_ref())
            .await
            .context("failed to reach the signaling relay")?;
        Ok(())
    }

    pub async fn disconnect(&self) {
        info!(target: "Client", "Disconnecting {}", self.local_id);
        self.channel.disconnect().await;
    }

    /// Hangs up any call, leaves the relay and stops the engine.
    pub async fn shutdown(&self) {
        let _ = self.engine.end_call().await;
        self.disconnect().await;
        self.engine.shutdown();
        if let Some(task) = self.engine_task.lock().await.take() {
            let _ = task.await;
        }
        info!(target: "Client", "Client {} shut down", self.local_id);
    }
}
