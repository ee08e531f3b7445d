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

//! Permission and adapter gate.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

use super::transport::{Capability, SerialTransport};
use crate::error::GateError;
use crate::events::{EventBus, SessionEvent};
use crate::state::AdapterState;

/// Capabilities requested when none are configured.
pub const DEFAULT_CAPABILITIES: [Capability; 3] = [
    Capability::Connect,
    Capability::Scan,
    Capability::FineLocation,
];

/// Owns [`AdapterState`] and makes sure permissions are in place.
pub struct AdapterGate<T: SerialTransport + ?Sized> {
    transport: Arc<T>,
    capabilities: Vec<Capability>,
    state: RwLock<AdapterState>,
    events: EventBus,
}

impl<T: SerialTransport + ?Sized> AdapterGate<T> {
    pub fn new(transport: Arc<T>, capabilities: Vec<Capability>, events: EventBus) -> Self {
        Self {
            transport,
            capabilities,
            state: RwLock::new(AdapterState::Unknown),
            events,
        }
    }

    pub fn state(&self) -> AdapterState {
        *self.state.read()
    }

    /// Request permissions and adapter power.
    ///
    /// A refused power-on request is not an error: the gate settles to
    /// [`AdapterState::Disabled`] and the caller decides what to offer.
    pub async fn ensure_ready(&self) -> Result<AdapterState, GateError> {
        let granted = self
            .transport
            .request_permissions(&self.capabilities)
            .await
            .map_err(|e| GateError::AdapterUnavailable(e.to_string()))?;

        let mut denied = None;
        for capability in &self.capabilities {
            if granted.get(capability).copied().unwrap_or(false) {
                info!("Permission granted: {}", capability);
            } else {
                warn!("Permission denied: {}", capability);
                denied.get_or_insert(*capability);
            }
        }
        if let Some(capability) = denied {
            return Err(GateError::PermissionDenied(capability));
        }

        let enabled = match self.transport.is_adapter_enabled().await {
            Ok(enabled) => enabled,
            Err(e) => {
                self.set_state(AdapterState::Unknown);
                return Err(GateError::AdapterUnavailable(e.to_string()));
            }
        };

        if !enabled {
            info!("Bluetooth adapter is off, requesting enable...");
            if let Err(e) = self.transport.request_adapter_enable().await {
                warn!("Adapter enable request refused: {}", e);
                self.set_state(AdapterState::Disabled);
                return Ok(AdapterState::Disabled);
            }
        }

        let state = match self.transport.is_adapter_enabled().await {
            Ok(enabled) => AdapterState::from(enabled),
            Err(e) => {
                self.set_state(AdapterState::Unknown);
                return Err(GateError::AdapterUnavailable(e.to_string()));
            }
        };
        self.set_state(state);
        info!("Bluetooth adapter ready: {}", state);
        Ok(state)
    }

    /// Power the adapter on.
    pub async fn enable_adapter(&self) -> Result<AdapterState, GateError> {
        self.transport
            .request_adapter_enable()
            .await
            .map_err(|e| GateError::AdapterUnavailable(e.to_string()))?;
        self.set_state(AdapterState::Enabled);
        Ok(AdapterState::Enabled)
    }

    /// Power the adapter off.
    pub async fn disable_adapter(&self) -> Result<AdapterState, GateError> {
        self.transport
            .request_adapter_disable()
            .await
            .map_err(|e| GateError::AdapterUnavailable(e.to_string()))?;
        self.set_state(AdapterState::Disabled);
        Ok(AdapterState::Disabled)
    }

    /// Record a new adapter state, notifying subscribers on change.
    ///
    /// Returns the previous state.
    pub fn set_state(&self, state: AdapterState) -> AdapterState {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            info!("Adapter state: {} -> {}", previous, state);
            match state {
                AdapterState::Enabled => self.events.publish(SessionEvent::AdapterEnabled),
                AdapterState::Disabled => self.events.publish(SessionEvent::AdapterDisabled),
                AdapterState::Unknown => {}
            }
        }
        previous
    }
}
