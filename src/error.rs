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

//! Error types surfaced by the session core.
//!
//! None of these are fatal: every failure is recoverable by a caller-driven
//! retry or by waiting for the adapter to come back.

use thiserror::Error;

use crate::bluetooth::Capability;

/// Failures reported by the Bluetooth transport itself.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The local adapter is missing or cannot be queried.
    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// Operation is not offered by this transport.
    #[error("operation not supported by transport: {0}")]
    Unsupported(&'static str),

    /// No serial link is open.
    #[error("no open serial link")]
    NotConnected,

    /// The peer closed the serial link.
    #[error("serial link closed by peer")]
    LinkClosed,

    /// Device identifier could not be parsed.
    #[error("invalid device id '{0}'")]
    InvalidDeviceId(String),

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bluez(#[from] bluer::Error),
}

/// Failures of the permission/adapter gate.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("permission denied: {0}")]
    PermissionDenied(Capability),

    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),
}

/// Failures of a discovery pass or a paired-device listing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),
}

impl From<TransportError> for DiscoveryError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::AdapterUnavailable(reason) => DiscoveryError::AdapterUnavailable(reason),
            other => DiscoveryError::DiscoveryFailed(other.to_string()),
        }
    }
}

/// Failures of the connection manager.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// A link is already being established or is open.
    #[error("a connection is already in progress or established")]
    AlreadyConnecting,

    #[error("not connected")]
    NotConnected,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("transport error: {0}")]
    TransportError(#[from] TransportError),
}
