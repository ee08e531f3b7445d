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

//! Typed session events and their fan-out.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

use crate::bluetooth::Device;

/// Events published by the session core.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Adapter was powered on.
    AdapterEnabled,
    /// Adapter was powered off or removed.
    AdapterDisabled,
    /// Paired devices were re-read from the adapter.
    KnownDevicesRefreshed(Vec<Device>),
    /// A new device was found by the running discovery pass.
    DeviceDiscovered(Device),
    /// The discovery pass ended normally.
    DiscoveryFinished { found: usize },
    /// The discovery pass ended with an error.
    DiscoveryFailed(String),
    /// A connect attempt started.
    Connecting(Device),
    /// A connect attempt ended without a link.
    ConnectFailed(String),
    /// Serial link established.
    Connected(Device),
    /// An open link was closed, or a pending attempt was cancelled.
    Disconnected,
    /// A chunk of bytes arrived on the serial link.
    DataReceived(Vec<u8>),
    /// Non-fatal transport error.
    TransportError(String),
}

/// Publish/subscribe hub for [`SessionEvent`]s.
///
/// Every subscriber gets every event published after it subscribed. Events
/// are handed to subscribers in registration order. Subscribers whose
/// receiver was dropped are pruned on the next publish.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<mpsc::UnboundedSender<SessionEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new listener.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Deliver an event to all current subscribers.
    pub fn publish(&self, event: SessionEvent) {
        trace!("Publishing event: {:?}", event);
        self.subscribers
            .write()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
