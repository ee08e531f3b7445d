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

//! In-memory transport for unit tests.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use super::device::Device;
use super::transport::{receiver_stream, Capability, PlatformEvent, SerialTransport};
use crate::error::TransportError;

pub(crate) struct MockTransport {
    pub adapter_present: AtomicBool,
    pub enabled: AtomicBool,
    pub enable_allowed: AtomicBool,
    pub denied: Mutex<Vec<Capability>>,
    pub paired: Mutex<Vec<Device>>,
    /// Items yielded by each discovery pass; `Err` entries fail the scan.
    pub scan: Mutex<Vec<Result<Device, String>>>,
    pub scan_step: Mutex<Duration>,
    pub scan_fails_to_start: AtomicBool,
    pub discover_calls: AtomicUsize,
    pub connect_delay: Mutex<Duration>,
    pub connect_error: Mutex<Option<String>>,
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub link_open: AtomicBool,
    pub written: Mutex<Vec<Vec<u8>>>,
    pub write_error: Mutex<Option<String>>,
    inbound: Mutex<VecDeque<Result<Vec<u8>, String>>>,
    /// Chunk returned on every poll once the queue is empty.
    repeat: Mutex<Option<Vec<u8>>>,
    link_closed: AtomicBool,
    events_tx: mpsc::Sender<PlatformEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<PlatformEvent>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        Self {
            adapter_present: AtomicBool::new(true),
            enabled: AtomicBool::new(true),
            enable_allowed: AtomicBool::new(true),
            denied: Mutex::new(Vec::new()),
            paired: Mutex::new(Vec::new()),
            scan: Mutex::new(Vec::new()),
            scan_step: Mutex::new(Duration::from_millis(1)),
            scan_fails_to_start: AtomicBool::new(false),
            discover_calls: AtomicUsize::new(0),
            connect_delay: Mutex::new(Duration::ZERO),
            connect_error: Mutex::new(None),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            link_open: AtomicBool::new(false),
            written: Mutex::new(Vec::new()),
            write_error: Mutex::new(None),
            inbound: Mutex::new(VecDeque::new()),
            repeat: Mutex::new(None),
            link_closed: AtomicBool::new(false),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub fn with_scan(self, items: Vec<Result<Device, String>>) -> Self {
        *self.scan.lock() = items;
        self
    }

    pub fn with_paired(self, devices: Vec<Device>) -> Self {
        *self.paired.lock() = devices;
        self
    }

    pub fn push_inbound(&self, chunk: &[u8]) {
        self.inbound.lock().push_back(Ok(chunk.to_vec()));
    }

    pub fn push_read_error(&self, message: &str) {
        self.inbound.lock().push_back(Err(message.to_string()));
    }

    pub fn repeat_inbound(&self, chunk: &[u8]) {
        *self.repeat.lock() = Some(chunk.to_vec());
    }

    pub fn close_link(&self) {
        self.link_closed.store(true, Ordering::SeqCst);
    }

    pub fn emit(&self, event: PlatformEvent) {
        let _ = self.events_tx.try_send(event);
    }
}

#[async_trait]
impl SerialTransport for MockTransport {
    async fn is_adapter_enabled(&self) -> Result<bool, TransportError> {
        if !self.adapter_present.load(Ordering::SeqCst) {
            return Err(TransportError::AdapterUnavailable("no adapter".to_string()));
        }
        Ok(self.enabled.load(Ordering::SeqCst))
    }

    async fn request_permissions(
        &self,
        capabilities: &[Capability],
    ) -> Result<HashMap<Capability, bool>, TransportError> {
        let denied = self.denied.lock();
        Ok(capabilities
            .iter()
            .map(|cap| (*cap, !denied.contains(cap)))
            .collect())
    }

    async fn request_adapter_enable(&self) -> Result<(), TransportError> {
        if !self.enable_allowed.load(Ordering::SeqCst) {
            return Err(TransportError::Other("user refused".to_string()));
        }
        self.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn request_adapter_disable(&self) -> Result<(), TransportError> {
        self.enabled.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn list_paired_devices(&self) -> Result<Vec<Device>, TransportError> {
        Ok(self.paired.lock().clone())
    }

    async fn discover_unpaired(
        &self,
    ) -> Result<BoxStream<'static, Result<Device, TransportError>>, TransportError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        if self.scan_fails_to_start.load(Ordering::SeqCst) {
            return Err(TransportError::Other("scan refused".to_string()));
        }
        let items = self.scan.lock().clone();
        let step = *self.scan_step.lock();
        Ok(stream::iter(items)
            .then(move |item| async move {
                tokio::time::sleep(step).await;
                item.map_err(TransportError::Other)
            })
            .boxed())
    }

    async fn connect(&self, _device_id: &str) -> Result<(), TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.connect_error.lock().clone() {
            return Err(TransportError::Other(reason));
        }
        self.link_open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.link_open.store(false, Ordering::SeqCst);
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if let Some(reason) = self.write_error.lock().clone() {
            return Err(TransportError::Other(reason));
        }
        self.written.lock().push(bytes.to_vec());
        Ok(())
    }

    async fn read_available(&self) -> Result<Option<Vec<u8>>, TransportError> {
        if let Some(item) = self.inbound.lock().pop_front() {
            return item.map(Some).map_err(TransportError::Other);
        }
        if self.link_closed.load(Ordering::SeqCst) {
            return Err(TransportError::LinkClosed);
        }
        Ok(self.repeat.lock().clone())
    }

    async fn platform_events(&self) -> Result<BoxStream<'static, PlatformEvent>, TransportError> {
        let rx = self
            .events_rx
            .lock()
            .take()
            .ok_or_else(|| TransportError::Other("events already taken".to_string()))?;
        Ok(receiver_stream(rx))
    }
}
