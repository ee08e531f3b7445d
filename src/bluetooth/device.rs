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

//! Remote devices and the set of devices known to this client.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A remote Bluetooth endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Device {
    /// Hardware address, e.g. `00:11:22:33:44:55`.
    pub id: String,
    /// Friendly name, if the device reported one.
    pub name: Option<String>,
}

impl Device {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name: name.filter(|n| !n.is_empty()),
        }
    }

    /// Name to show a user; the id when no name is known.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None => f.write_str(&self.id),
        }
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    devices: Vec<Device>,
    ids: HashSet<String>,
}

/// Devices known to the client, keyed by id, in first-seen order.
///
/// Cheap to clone; clones share the same set. Readers take a shared lock,
/// writers an exclusive one.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a device unless its id is already present.
    ///
    /// Returns `true` when the device was added. The first entry for an id wins.
    pub fn insert(&self, device: Device) -> bool {
        let mut inner = self.inner.write();
        if !inner.ids.insert(device.id.clone()) {
            return false;
        }
        inner.devices.push(device);
        true
    }

    /// Insert every device whose id is new. Returns how many were added.
    pub fn extend(&self, devices: impl IntoIterator<Item = Device>) -> usize {
        let mut inner = self.inner.write();
        let mut added = 0;
        for device in devices {
            if inner.ids.insert(device.id.clone()) {
                inner.devices.push(device);
                added += 1;
            }
        }
        added
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().ids.contains(id)
    }

    pub fn get(&self, id: &str) -> Option<Device> {
        self.inner.read().devices.iter().find(|d| d.id == id).cloned()
    }

    /// Snapshot of all devices in insertion order.
    pub fn devices(&self) -> Vec<Device> {
        self.inner.read().devices.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.devices.clear();
        inner.ids.clear();
    }
}
