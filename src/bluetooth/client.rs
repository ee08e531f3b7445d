// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Serial client tying the gate, discovery and the connection together.

use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::connection::ConnectionManager;
use super::device::{Device, DeviceRegistry};
use super::discovery::{DiscoveryPass, DiscoverySession};
use super::gate::AdapterGate;
use super::transport::{PlatformEvent, SerialTransport};
use crate::config::BluetoothConfig;
use crate::error::{ConnectionError, DiscoveryError, GateError};
use crate::events::{EventBus, SessionEvent};
use crate::state::{AdapterState, ConnectionState};

struct Inner<T: SerialTransport + ?Sized> {
    transport: Arc<T>,
    events: EventBus,
    registry: DeviceRegistry,
    gate: AdapterGate<T>,
    discovery: DiscoverySession<T>,
    connection: ConnectionManager<T>,
}

impl<T: SerialTransport + ?Sized> Inner<T> {
    async fn handle_platform_event(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::AdapterDisabled => self.adapter_disabled(),
            PlatformEvent::AdapterEnabled => {
                if self.gate.set_state(AdapterState::Enabled) != AdapterState::Enabled {
                    self.refresh_known_devices().await;
                }
            }
            PlatformEvent::TransportError(message) => {
                error!("Transport error: {}", message);
                self.events.publish(SessionEvent::TransportError(message));
            }
        }
    }

    /// The link, the scan and the device list all go with the radio.
    fn adapter_disabled(&self) {
        self.connection.handle_adapter_disabled();
        self.discovery.stop_discovery();
        self.registry.clear();
        self.gate.set_state(AdapterState::Disabled);
    }

    async fn refresh_known_devices(&self) {
        if let Err(e) = self.discovery.refresh_known_devices().await {
            warn!("Failed to list paired devices: {}", e);
        }
    }
}

/// Client for one Bluetooth serial peripheral at a time.
pub struct SerialClient<T: SerialTransport + ?Sized> {
    inner: Arc<Inner<T>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl<T: SerialTransport + ?Sized> SerialClient<T> {
    /// Create a client over `transport`.
    pub fn new(transport: Arc<T>, config: &BluetoothConfig) -> Self {
        let events = EventBus::new();
        let registry = DeviceRegistry::new();

        let gate = AdapterGate::new(
            transport.clone(),
            config.required_capabilities.clone(),
            events.clone(),
        );
        let discovery = DiscoverySession::new(
            transport.clone(),
            registry.clone(),
            events.clone(),
            config.discovery_timeout(),
        );
        let connection =
            ConnectionManager::new(transport.clone(), events.clone(), config.link_config());

        Self {
            inner: Arc::new(Inner {
                transport,
                events,
                registry,
                gate,
                discovery,
                connection,
            }),
            watcher: Mutex::new(None),
        }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Start following the adapter, then run the gate and load paired devices.
    ///
    /// Adapter events are followed even when the gate fails, so a later
    /// `enable_adapter` leaves the client fully working.
    pub async fn start(&self) -> Result<AdapterState, GateError> {
        {
            let mut watcher = self.watcher.lock();
            if watcher.is_none() {
                *watcher = Some(self.spawn_watcher());
            }
        }

        let state = self.inner.gate.ensure_ready().await?;
        if state.is_enabled() {
            self.inner.refresh_known_devices().await;
        }
        Ok(state)
    }

    fn spawn_watcher(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut events = match inner.transport.platform_events().await {
                Ok(events) => events,
                Err(e) => {
                    warn!("Adapter events unavailable: {}", e);
                    return;
                }
            };
            info!("Following adapter events");
            while let Some(event) = events.next().await {
                inner.handle_platform_event(event).await;
            }
            info!("Adapter event stream ended");
        })
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.inner.gate.state()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn is_discovering(&self) -> bool {
        self.inner.discovery.is_discovering()
    }

    /// Known devices: paired ones first, then discovered ones.
    pub fn devices(&self) -> Vec<Device> {
        self.inner.registry.devices()
    }

    pub fn connected_device(&self) -> Option<Device> {
        self.inner.connection.connected_device()
    }

    pub fn pending_outbound(&self) -> Option<String> {
        self.inner.connection.pending_outbound()
    }

    pub fn drain_inbound(&self) -> Vec<u8> {
        self.inner.connection.drain_inbound()
    }

    /// Start a discovery pass; `Ok(None)` when one is already running.
    pub fn start_discovery(&self) -> Result<Option<DiscoveryPass>, DiscoveryError> {
        match self.inner.gate.state() {
            AdapterState::Enabled => Ok(self.inner.discovery.start_discovery()),
            state => Err(DiscoveryError::AdapterUnavailable(format!("adapter {}", state))),
        }
    }

    pub fn stop_discovery(&self) {
        self.inner.discovery.stop_discovery();
    }

    /// Re-read paired devices into the registry.
    pub async fn refresh_known_devices(&self) -> Result<Vec<Device>, DiscoveryError> {
        self.inner.discovery.refresh_known_devices().await
    }

    /// Connect to a device by id.
    ///
    /// Ids not in the registry are still tried; the platform decides whether
    /// the address is reachable.
    pub async fn connect(&self, device_id: &str) -> Result<(), ConnectionError> {
        if self.inner.gate.state() == AdapterState::Disabled {
            return Err(ConnectionError::ConnectFailed("adapter disabled".to_string()));
        }
        let device = self
            .inner
            .registry
            .get(device_id)
            .unwrap_or_else(|| Device::new(device_id, None));

        // Inquiry competes with paging on classic radios.
        self.inner.discovery.stop_discovery();
        self.inner.connection.connect(device).await
    }

    pub async fn disconnect(&self) {
        self.inner.connection.disconnect().await;
    }

    pub async fn send(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.inner.connection.send(bytes).await
    }

    pub async fn send_text(&self, text: &str) -> Result<(), ConnectionError> {
        self.inner.connection.send_text(text).await
    }

    /// Power the adapter on and reload paired devices.
    pub async fn enable_adapter(&self) -> Result<AdapterState, GateError> {
        let state = self.inner.gate.enable_adapter().await?;
        self.inner.refresh_known_devices().await;
        Ok(state)
    }

    /// Power the adapter off. Drops the link and the device list.
    pub async fn disable_adapter(&self) -> Result<AdapterState, GateError> {
        let state = self.inner.gate.disable_adapter().await?;
        self.inner.adapter_disabled();
        Ok(state)
    }

    /// Close the link, stop scanning and stop following the adapter.
    pub async fn shutdown(&self) {
        self.inner.discovery.stop_discovery();
        self.inner.connection.disconnect().await;
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
        info!("Serial client stopped");
    }
}

impl<T: SerialTransport + ?Sized> Drop for SerialClient<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
    }
}
