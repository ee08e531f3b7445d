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

//! Bluetooth communication module.
//!
//! Client side of a classic serial link: permissions and adapter power,
//! discovery of nearby peripherals, and the single RFCOMM connection.

mod bluez;
mod client;
mod connection;
mod device;
mod discovery;
mod gate;
mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use bluez::{BluezTransport, SPP_UUID};
pub use client::SerialClient;
pub use connection::{
    ConnectionManager, LinkConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_POLL_INTERVAL,
};
pub use device::{Device, DeviceRegistry};
pub use discovery::{DiscoveryPass, DiscoverySession};
pub use gate::{AdapterGate, DEFAULT_CAPABILITIES};
pub use transport::{
    poll_inbound, ByteStream, Capability, PlatformEvent, SerialTransport, MIN_POLL_INTERVAL,
};
