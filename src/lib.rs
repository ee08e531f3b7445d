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

//! Bluetooth Serial Port Profile client.
//!
//! Finds nearby serial peripherals, opens one RFCOMM link at a time and
//! exchanges text over it. State changes are published as [`SessionEvent`]s.

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod events;
pub mod state;

pub use bluetooth::{BluezTransport, Device, SerialClient, SerialTransport};
pub use config::Config;
pub use error::{ConnectionError, DiscoveryError, GateError, TransportError};
pub use events::{EventBus, SessionEvent};
pub use state::{AdapterState, ConnectionState};
