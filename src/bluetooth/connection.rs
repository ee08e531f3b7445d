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

//! Connection manager for the single serial link.

use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::device::Device;
use super::transport::{SerialTransport, MIN_POLL_INTERVAL};
use crate::error::{ConnectionError, TransportError};
use crate::events::{EventBus, SessionEvent};
use crate::state::ConnectionState;

/// Default interval between reads of a pull-only transport.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default bound on a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timing knobs of the connection manager.
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    pub connect_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Fields of the one session this process may hold.
#[derive(Debug, Default)]
struct Session {
    state: ConnectionState,
    target: Option<Device>,
    inbound: Vec<u8>,
    pending_outbound: Option<String>,
    /// Bumped on every connect attempt and every reset.
    generation: u64,
    receiver: Option<JoinHandle<()>>,
}

impl Session {
    /// Settle to `Idle`, returning the receive task to abort.
    fn reset(&mut self) -> Option<JoinHandle<()>> {
        self.state = ConnectionState::Idle;
        self.target = None;
        self.inbound.clear();
        self.pending_outbound = None;
        self.generation += 1;
        self.receiver.take()
    }
}

struct Shared {
    session: Mutex<Session>,
    events: EventBus,
}

/// Owns the active link: connect, disconnect, send and the receive loop.
///
/// Every transition happens under one lock. Transport calls are made
/// outside of it; their results are only applied if the link generation
/// they started under is still current.
pub struct ConnectionManager<T: SerialTransport + ?Sized> {
    transport: Arc<T>,
    shared: Arc<Shared>,
    config: LinkConfig,
}

impl<T: SerialTransport + ?Sized> ConnectionManager<T> {
    pub fn new(transport: Arc<T>, events: EventBus, mut config: LinkConfig) -> Self {
        config.poll_interval = config.poll_interval.max(MIN_POLL_INTERVAL);
        Self {
            transport,
            shared: Arc::new(Shared {
                session: Mutex::new(Session::default()),
                events,
            }),
            config,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.session.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Device of the open link.
    pub fn connected_device(&self) -> Option<Device> {
        let session = self.shared.session.lock();
        match session.state {
            ConnectionState::Connected => session.target.clone(),
            _ => None,
        }
    }

    /// Text of a send that has not completed successfully.
    pub fn pending_outbound(&self) -> Option<String> {
        self.shared.session.lock().pending_outbound.clone()
    }

    /// Take everything received since the last drain.
    pub fn drain_inbound(&self) -> Vec<u8> {
        std::mem::take(&mut self.shared.session.lock().inbound)
    }

    /// Open a serial link to `device`.
    ///
    /// Only accepted from `Idle`. On any failure the manager is back in
    /// `Idle` and a retry is simply another call.
    pub async fn connect(&self, device: Device) -> Result<(), ConnectionError> {
        let generation = {
            let mut session = self.shared.session.lock();
            if session.state != ConnectionState::Idle {
                debug!("Connect to {} rejected: {}", device.id, session.state);
                return Err(ConnectionError::AlreadyConnecting);
            }
            session.state = ConnectionState::Connecting;
            session.target = Some(device.clone());
            session.generation += 1;
            self.shared
                .events
                .publish(SessionEvent::Connecting(device.clone()));
            session.generation
        };

        info!("Connecting to {}...", device);
        let result =
            tokio::time::timeout(self.config.connect_timeout, self.transport.connect(&device.id))
                .await;

        let timed_out = result.is_err();
        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "timed out after {:?}",
                self.config.connect_timeout
            )),
        };

        {
            let mut session = self.shared.session.lock();
            if session.generation == generation {
                match &failure {
                    None => {
                        session.state = ConnectionState::Connected;
                        session.receiver = Some(self.spawn_receiver(generation));
                        info!("Connected to device {}", device.display_name());
                        self.shared
                            .events
                            .publish(SessionEvent::Connected(device.clone()));
                        return Ok(());
                    }
                    Some(reason) => {
                        warn!("Connect to {} failed: {}", device.id, reason);
                        session.reset();
                        self.shared
                            .events
                            .publish(SessionEvent::ConnectFailed(reason.clone()));
                    }
                }
            }
        }

        // A newer attempt may own the transport by now; leave it alone.
        let idle = self.state() == ConnectionState::Idle;
        match failure {
            Some(reason) => {
                if timed_out && idle {
                    // Make sure a half-open link does not linger.
                    self.transport.disconnect().await;
                }
                Err(ConnectionError::ConnectFailed(reason))
            }
            None => {
                // Reset while connecting; the link we just opened is stale.
                info!("Connect to {} cancelled, closing link", device.id);
                if idle {
                    self.transport.disconnect().await;
                }
                Err(ConnectionError::ConnectFailed("cancelled".to_string()))
            }
        }
    }

    /// Close the link from any state. Idempotent.
    ///
    /// Once this returns no further `DataReceived` event is published for
    /// the closed link.
    pub async fn disconnect(&self) {
        if self.reset("disconnect requested") {
            self.transport.disconnect().await;
        }
    }

    /// Implicit disconnect after the adapter went away.
    ///
    /// The link is already gone with the radio, so the transport is not
    /// asked to close it.
    pub fn handle_adapter_disabled(&self) {
        self.reset("adapter disabled");
    }

    /// Transmit raw bytes over the open link.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        self.transport.write(bytes).await?;
        debug!("Sent {} bytes", bytes.len());
        Ok(())
    }

    /// Transmit text, keeping it as pending until the write succeeds.
    pub async fn send_text(&self, text: &str) -> Result<(), ConnectionError> {
        {
            let mut session = self.shared.session.lock();
            if session.state != ConnectionState::Connected {
                return Err(ConnectionError::NotConnected);
            }
            session.pending_outbound = Some(text.to_string());
        }

        self.send(text.as_bytes()).await?;
        info!("Data transferred successfully: {} chars", text.len());

        let mut session = self.shared.session.lock();
        if session.pending_outbound.as_deref() == Some(text) {
            session.pending_outbound = None;
        }
        Ok(())
    }

    /// Settle to `Idle`. Returns whether there was anything to tear down.
    fn reset(&self, reason: &str) -> bool {
        let receiver = {
            let mut session = self.shared.session.lock();
            if session.state == ConnectionState::Idle {
                return false;
            }
            info!("Disconnecting ({}): was {}", reason, session.state);
            let receiver = session.reset();
            self.shared.events.publish(SessionEvent::Disconnected);
            receiver
        };
        if let Some(handle) = receiver {
            handle.abort();
        }
        true
    }

    fn spawn_receiver(&self, generation: u64) -> JoinHandle<()> {
        let inbound = self.transport.clone().inbound(self.config.poll_interval);
        let shared = self.shared.clone();
        tokio::spawn(receive_loop(inbound, shared, generation))
    }
}

impl<T: SerialTransport + ?Sized> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.shared.session.lock().receiver.take() {
            handle.abort();
        }
    }
}

/// Forward inbound chunks while the link generation is current.
async fn receive_loop(
    mut inbound: super::transport::ByteStream,
    shared: Arc<Shared>,
    generation: u64,
) {
    debug!("Receive loop started for link {}", generation);

    while let Some(item) = inbound.next().await {
        let mut session = shared.session.lock();
        if session.generation != generation || session.state != ConnectionState::Connected {
            break;
        }
        match item {
            Ok(chunk) => {
                debug!("Received {} bytes", chunk.len());
                session.inbound.extend_from_slice(&chunk);
                shared.events.publish(SessionEvent::DataReceived(chunk));
            }
            Err(TransportError::LinkClosed) => {
                info!("Connection closed by peer");
                let _ = session.reset();
                shared.events.publish(SessionEvent::Disconnected);
                return;
            }
            Err(e) => {
                error!("Error reading data: {}", e);
                shared.events.publish(SessionEvent::TransportError(e.to_string()));
            }
        }
    }

    let mut session = shared.session.lock();
    if session.generation == generation && session.state == ConnectionState::Connected {
        info!("Inbound stream ended, closing link");
        let _ = session.reset();
        shared.events.publish(SessionEvent::Disconnected);
    }
}
