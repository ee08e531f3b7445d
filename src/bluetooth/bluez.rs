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

//! BlueZ transport: classic discovery and RFCOMM sockets via `bluer`.

use anyhow::Result;
use async_trait::async_trait;
use bluer::rfcomm::stream::{OwnedReadHalf, OwnedWriteHalf};
use bluer::rfcomm::{SocketAddr, Stream};
use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, DiscoveryFilter, DiscoveryTransport,
    ErrorKind,
};
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::device::Device;
use super::transport::{receiver_stream, Capability, PlatformEvent, SerialTransport};
use crate::config::BluetoothConfig;
use crate::error::TransportError;

/// Standard SPP UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

const READ_BUFFER_SIZE: usize = 1024;

/// Serial transport backed by the local BlueZ daemon.
pub struct BluezTransport {
    adapter: Adapter,
    channels: Vec<u8>,
    spp_only: bool,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl BluezTransport {
    /// Open a BlueZ session on the configured (or default) adapter.
    pub async fn new(config: &BluetoothConfig) -> Result<Self> {
        let session = bluer::Session::new().await?;
        info!("BlueZ session created");

        let adapter = match &config.adapter {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("Using Bluetooth adapter: {}", adapter.name());

        if let Err(e) = adapter
            .set_discovery_filter(DiscoveryFilter {
                transport: DiscoveryTransport::BrEdr,
                ..Default::default()
            })
            .await
        {
            warn!("Failed to set discovery filter: {}", e);
        }

        Ok(Self {
            adapter,
            channels: config.rfcomm_channels.clone(),
            spp_only: config.spp_only,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        })
    }

    /// Describe a device reported during discovery, skipping bonded ones.
    async fn describe_unpaired(
        adapter: &Adapter,
        addr: Address,
        spp_only: bool,
    ) -> Result<Option<Device>, TransportError> {
        let device = adapter.device(addr)?;
        if device.is_paired().await? {
            return Ok(None);
        }
        if spp_only {
            let uuids = device.uuids().await?.unwrap_or_default();
            if !uuids.contains(&SPP_UUID) {
                debug!("Skipping {}: no serial port service", addr);
                return Ok(None);
            }
        }
        let name = device.name().await?;
        Ok(Some(Device::new(addr.to_string(), name)))
    }
}

fn is_permission_error(err: &bluer::Error) -> bool {
    matches!(err.kind, ErrorKind::NotAuthorized | ErrorKind::NotPermitted)
}

#[async_trait]
impl SerialTransport for BluezTransport {
    async fn is_adapter_enabled(&self) -> Result<bool, TransportError> {
        self.adapter
            .is_powered()
            .await
            .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))
    }

    async fn request_permissions(
        &self,
        capabilities: &[Capability],
    ) -> Result<HashMap<Capability, bool>, TransportError> {
        // BlueZ has no runtime prompts; access is decided by D-Bus policy,
        // so a single privileged read tells whether we may use the adapter.
        let granted = match self.adapter.address().await {
            Ok(_) => true,
            Err(e) if is_permission_error(&e) => false,
            Err(e) => return Err(TransportError::AdapterUnavailable(e.to_string())),
        };
        Ok(capabilities.iter().map(|cap| (*cap, granted)).collect())
    }

    async fn request_adapter_enable(&self) -> Result<(), TransportError> {
        info!("Powering on Bluetooth adapter...");
        self.adapter.set_powered(true).await?;
        Ok(())
    }

    async fn request_adapter_disable(&self) -> Result<(), TransportError> {
        info!("Powering off Bluetooth adapter...");
        self.adapter.set_powered(false).await?;
        Ok(())
    }

    async fn list_paired_devices(&self) -> Result<Vec<Device>, TransportError> {
        let mut devices = Vec::new();

        for addr in self.adapter.device_addresses().await? {
            let device = self.adapter.device(addr)?;
            if device.is_paired().await? {
                let name = device.name().await.unwrap_or(None);
                devices.push(Device::new(addr.to_string(), name));
            }
        }

        Ok(devices)
    }

    async fn discover_unpaired(
        &self,
    ) -> Result<BoxStream<'static, Result<Device, TransportError>>, TransportError> {
        let adapter = self.adapter.clone();
        let spp_only = self.spp_only;
        let (tx, rx) = mpsc::channel(32);
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

        // The discovery session lives as long as this task; dropping the
        // returned stream ends both.
        tokio::spawn(async move {
            let events = match adapter.discover_devices().await {
                Ok(events) => {
                    let _ = ready_tx.send(Ok(()));
                    events
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            futures::pin_mut!(events);
            info!("Bluetooth scan started");

            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    event = events.next() => match event {
                        Some(AdapterEvent::DeviceAdded(addr)) => {
                            match BluezTransport::describe_unpaired(&adapter, addr, spp_only).await {
                                Ok(Some(device)) => {
                                    if tx.send(Ok(device)).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => debug!("Ignoring device {}: {}", addr, e),
                            }
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
            info!("Bluetooth scan stopped");
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(receiver_stream(rx)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(TransportError::Other("discovery task ended".to_string())),
        }
    }

    async fn connect(&self, device_id: &str) -> Result<(), TransportError> {
        let addr: Address = device_id
            .parse()
            .map_err(|_| TransportError::InvalidDeviceId(device_id.to_string()))?;

        let mut last_error = None;
        for &channel in &self.channels {
            info!("Attempting to connect to {} on channel {}", addr, channel);
            match Stream::connect(SocketAddr::new(addr, channel)).await {
                Ok(stream) => {
                    info!("Connected on channel {}", channel);
                    let (reader, writer) = stream.into_split();
                    *self.reader.lock().await = Some(reader);
                    *self.writer.lock().await = Some(writer);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to connect on channel {}: {}", channel, e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => TransportError::Io(e),
            None => TransportError::Other("no RFCOMM channels configured".to_string()),
        })
    }

    async fn disconnect(&self) {
        self.reader.lock().await.take();
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Shutdown of serial link failed: {}", e);
            }
        }
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn read_available(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(TransportError::NotConnected)?;

        let mut buf = [0u8; READ_BUFFER_SIZE];
        match reader.read(&mut buf).now_or_never() {
            None => Ok(None),
            Some(Ok(0)) => Err(TransportError::LinkClosed),
            Some(Ok(n)) => Ok(Some(buf[..n].to_vec())),
            Some(Err(e)) => Err(e.into()),
        }
    }

    async fn platform_events(&self) -> Result<BoxStream<'static, PlatformEvent>, TransportError> {
        let adapter = self.adapter.clone();
        let (tx, rx) = mpsc::channel(16);
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let events = match adapter.events().await {
                Ok(events) => {
                    let _ = ready_tx.send(Ok(()));
                    events
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            futures::pin_mut!(events);

            loop {
                let event = tokio::select! {
                    _ = tx.closed() => break,
                    event = events.next() => event,
                };
                let mapped = match event {
                    Some(AdapterEvent::PropertyChanged(AdapterProperty::Powered(true))) => {
                        PlatformEvent::AdapterEnabled
                    }
                    Some(AdapterEvent::PropertyChanged(AdapterProperty::Powered(false))) => {
                        PlatformEvent::AdapterDisabled
                    }
                    Some(_) => continue,
                    None => {
                        let _ = tx
                            .send(PlatformEvent::TransportError(
                                "adapter event stream ended".to_string(),
                            ))
                            .await;
                        break;
                    }
                };
                if tx.send(mapped).await.is_err() {
                    break;
                }
            }
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(receiver_stream(rx)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(TransportError::Other("adapter event task ended".to_string())),
        }
    }
}
