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

//! Capability surface the session core needs from a Bluetooth serial stack.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::device::Device;
use crate::error::TransportError;

/// OS-level capability needed for scanning and connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Connect,
    Scan,
    FineLocation,
    CoarseLocation,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Connect => "bluetooth-connect",
            Capability::Scan => "bluetooth-scan",
            Capability::FineLocation => "fine-location",
            Capability::CoarseLocation => "coarse-location",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications pushed by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    AdapterEnabled,
    AdapterDisabled,
    TransportError(String),
}

/// Shortest interval between two reads of a pull-only transport.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Stream of inbound byte chunks from the open link.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// Bluetooth serial transport.
///
/// Implementations own the radio-facing side: permissions, adapter power,
/// discovery and a single RFCOMM link.
#[async_trait]
pub trait SerialTransport: Send + Sync + 'static {
    async fn is_adapter_enabled(&self) -> Result<bool, TransportError>;

    /// Ask for the given capabilities. The map holds one entry per request.
    async fn request_permissions(
        &self,
        capabilities: &[Capability],
    ) -> Result<HashMap<Capability, bool>, TransportError>;

    async fn request_adapter_enable(&self) -> Result<(), TransportError>;

    async fn request_adapter_disable(&self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("adapter power off"))
    }

    /// Bonded devices known to the platform.
    async fn list_paired_devices(&self) -> Result<Vec<Device>, TransportError>;

    /// Start a scan for unpaired devices in range.
    ///
    /// The stream ends when the platform stops the scan or is dropped.
    async fn discover_unpaired(
        &self,
    ) -> Result<BoxStream<'static, Result<Device, TransportError>>, TransportError>;

    async fn connect(&self, device_id: &str) -> Result<(), TransportError>;

    async fn disconnect(&self);

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Bytes that arrived since the last call, without waiting.
    ///
    /// Returns [`TransportError::LinkClosed`] once the peer has hung up.
    async fn read_available(&self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Adapter power changes and asynchronous transport errors.
    async fn platform_events(&self) -> Result<BoxStream<'static, PlatformEvent>, TransportError>;

    /// Inbound bytes of the open link.
    ///
    /// Defaults to polling [`read_available`](Self::read_available) every
    /// `poll_interval`. Transports that can push data override this.
    fn inbound(self: Arc<Self>, poll_interval: Duration) -> ByteStream {
        poll_inbound(self, poll_interval)
    }
}

/// Turn a pull-only transport into a [`ByteStream`].
///
/// Empty reads are skipped. The stream ends after the link is closed by the
/// peer; other errors are yielded and polling continues. Intervals below
/// [`MIN_POLL_INTERVAL`] are raised to it.
pub fn poll_inbound<T>(transport: Arc<T>, poll_interval: Duration) -> ByteStream
where
    T: SerialTransport + ?Sized,
{
    let mut ticker = tokio::time::interval(poll_interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    stream::unfold(
        (transport, ticker, false),
        |(transport, mut ticker, closed)| async move {
            if closed {
                return None;
            }
            loop {
                ticker.tick().await;
                match transport.read_available().await {
                    Ok(Some(chunk)) if !chunk.is_empty() => {
                        return Some((Ok(chunk), (transport, ticker, false)));
                    }
                    Ok(_) => continue,
                    Err(TransportError::LinkClosed) => {
                        return Some((Err(TransportError::LinkClosed), (transport, ticker, true)));
                    }
                    Err(e) => return Some((Err(e), (transport, ticker, false))),
                }
            }
        },
    )
    .boxed()
}

/// Adapt a bounded channel receiver into a boxed stream.
pub(crate) fn receiver_stream<T>(rx: mpsc::Receiver<T>) -> BoxStream<'static, T>
where
    T: Send + 'static,
{
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}
