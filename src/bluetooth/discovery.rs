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

//! Discovery of nearby unpaired devices.

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::device::{Device, DeviceRegistry};
use super::transport::SerialTransport;
use crate::error::DiscoveryError;
use crate::events::{EventBus, SessionEvent};

/// Devices found by one discovery pass.
///
/// Yields each new device once, then ends with the pass. A failed scan is
/// reported as the last item.
#[derive(Debug)]
pub struct DiscoveryPass {
    rx: mpsc::UnboundedReceiver<Result<Device, DiscoveryError>>,
}

impl Stream for DiscoveryPass {
    type Item = Result<Device, DiscoveryError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[derive(Default)]
struct PassSlot {
    next_id: u64,
    current: Option<(u64, JoinHandle<()>)>,
}

/// Clears the slot when the pass task finishes or is aborted.
struct PassGuard {
    slot: Arc<Mutex<PassSlot>>,
    id: u64,
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if matches!(slot.current, Some((id, _)) if id == self.id) {
            slot.current = None;
        }
    }
}

/// Runs at most one bounded scan at a time and merges results into the
/// [`DeviceRegistry`].
pub struct DiscoverySession<T: SerialTransport + ?Sized> {
    transport: Arc<T>,
    registry: DeviceRegistry,
    events: EventBus,
    timeout: Duration,
    slot: Arc<Mutex<PassSlot>>,
}

impl<T: SerialTransport + ?Sized> DiscoverySession<T> {
    pub fn new(
        transport: Arc<T>,
        registry: DeviceRegistry,
        events: EventBus,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            registry,
            events,
            timeout,
            slot: Arc::new(Mutex::new(PassSlot::default())),
        }
    }

    pub fn is_discovering(&self) -> bool {
        self.slot.lock().current.is_some()
    }

    /// Start a discovery pass.
    ///
    /// Returns `None` without scanning when a pass is already running.
    pub fn start_discovery(&self) -> Option<DiscoveryPass> {
        let mut slot = self.slot.lock();
        if slot.current.is_some() {
            debug!("Discovery already running, ignoring start request");
            return None;
        }

        slot.next_id += 1;
        let id = slot.next_id;
        let (tx, rx) = mpsc::unbounded_channel();
        let guard = PassGuard {
            slot: self.slot.clone(),
            id,
        };
        let transport = self.transport.clone();
        let registry = self.registry.clone();
        let events = self.events.clone();
        let timeout = self.timeout;

        let handle = tokio::spawn(async move {
            let _guard = guard;
            match run_pass(transport.as_ref(), &registry, &events, &tx, timeout).await {
                Ok(found) => {
                    info!("Discovery finished: {} new device(s)", found);
                    events.publish(SessionEvent::DiscoveryFinished { found });
                }
                Err(e) => {
                    warn!("Discovery failed: {}", e);
                    events.publish(SessionEvent::DiscoveryFailed(e.to_string()));
                    let _ = tx.send(Err(e));
                }
            }
        });
        slot.current = Some((id, handle));

        info!("Discovery pass {} started", id);
        Some(DiscoveryPass { rx })
    }

    /// Cancel the running pass, if any. Devices found so far are kept.
    pub fn stop_discovery(&self) {
        if let Some((id, handle)) = self.slot.lock().current.take() {
            info!("Stopping discovery pass {}", id);
            handle.abort();
        }
    }

    /// Bonded devices as reported by the platform.
    pub async fn list_known_devices(&self) -> Result<Vec<Device>, DiscoveryError> {
        Ok(self.transport.list_paired_devices().await?)
    }

    /// Re-read bonded devices and merge them into the registry.
    pub async fn refresh_known_devices(&self) -> Result<Vec<Device>, DiscoveryError> {
        let devices = self.list_known_devices().await?;
        let added = self.registry.extend(devices.iter().cloned());
        debug!("Known devices refreshed: {} listed, {} new", devices.len(), added);
        self.events
            .publish(SessionEvent::KnownDevicesRefreshed(devices.clone()));
        Ok(devices)
    }
}

impl<T: SerialTransport + ?Sized> Drop for DiscoverySession<T> {
    fn drop(&mut self) {
        self.stop_discovery();
    }
}

async fn run_pass<T: SerialTransport + ?Sized>(
    transport: &T,
    registry: &DeviceRegistry,
    events: &EventBus,
    tx: &mpsc::UnboundedSender<Result<Device, DiscoveryError>>,
    timeout: Duration,
) -> Result<usize, DiscoveryError> {
    let mut scan = transport.discover_unpaired().await?;
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut seen = HashSet::new();
    let mut found = 0;

    loop {
        tokio::select! {
            _ = &mut deadline => {
                debug!("Discovery window of {:?} elapsed", timeout);
                break;
            }
            item = scan.next() => match item {
                None => break,
                Some(Ok(device)) => {
                    if !seen.insert(device.id.clone()) {
                        debug!("Duplicate device in pass: {}", device.id);
                        continue;
                    }
                    if !registry.insert(device.clone()) {
                        debug!("Device already known: {}", device.id);
                        continue;
                    }
                    info!("Found device: {}", device);
                    found += 1;
                    events.publish(SessionEvent::DeviceDiscovered(device.clone()));
                    let _ = tx.send(Ok(device));
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::mock::MockTransport;
    use std::sync::atomic::Ordering;

    fn named(id: &str, name: &str) -> Device {
        Device::new(id, Some(name.to_string()))
    }

    fn session(transport: Arc<MockTransport>) -> (DiscoverySession<MockTransport>, DeviceRegistry) {
        let registry = DeviceRegistry::new();
        let discovery = DiscoverySession::new(
            transport,
            registry.clone(),
            EventBus::new(),
            Duration::from_secs(5),
        );
        (discovery, registry)
    }

    async fn collect(pass: DiscoveryPass) -> Vec<Result<Device, DiscoveryError>> {
        pass.collect().await
    }

    #[tokio::test]
    async fn test_duplicate_ids_keep_first() {
        let transport = Arc::new(
            MockTransport::new().with_scan(vec![Ok(named("A", "Foo")), Ok(named("A", "Foo2"))]),
        );
        let (discovery, registry) = session(transport);

        let found = collect(discovery.start_discovery().unwrap()).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].as_ref().unwrap().name.as_deref(), Some("Foo"));
        assert_eq!(registry.get("A").unwrap().name.as_deref(), Some("Foo"));
    }

    #[tokio::test]
    async fn test_known_devices_are_not_reemitted() {
        let transport = Arc::new(
            MockTransport::new().with_scan(vec![Ok(named("A", "Paired")), Ok(named("B", "New"))]),
        );
        let (discovery, registry) = session(transport);
        registry.insert(named("A", "Paired"));

        let ids: Vec<_> = collect(discovery.start_discovery().unwrap())
            .await
            .into_iter()
            .map(|d| d.unwrap().id)
            .collect();
        assert_eq!(ids, vec!["B"]);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_second_start_is_noop() {
        let transport = Arc::new(MockTransport::new().with_scan(vec![
            Ok(named("A", "Foo")),
            Ok(named("B", "Bar")),
        ]));
        *transport.scan_step.lock() = Duration::from_millis(20);
        let (discovery, _registry) = session(transport.clone());

        let pass = discovery.start_discovery().unwrap();
        assert!(discovery.start_discovery().is_none());
        assert!(discovery.is_discovering());

        assert_eq!(collect(pass).await.len(), 2);
        assert_eq!(transport.discover_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_flag_resets_after_pass() {
        let transport = Arc::new(MockTransport::new().with_scan(vec![Ok(named("A", "Foo"))]));
        let (discovery, _registry) = session(transport.clone());

        collect(discovery.start_discovery().unwrap()).await;
        tokio::task::yield_now().await;
        assert!(!discovery.is_discovering());

        // A fresh pass runs and finds nothing new.
        let again = collect(discovery.start_discovery().unwrap()).await;
        assert!(again.is_empty());
        assert_eq!(transport.discover_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_keeps_partial_results() {
        let transport = Arc::new(MockTransport::new().with_scan(vec![
            Ok(named("A", "Foo")),
            Err("radio hiccup".to_string()),
            Ok(named("B", "Never")),
        ]));
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let registry = DeviceRegistry::new();
        let discovery = DiscoverySession::new(
            transport,
            registry.clone(),
            events,
            Duration::from_secs(5),
        );

        let items = collect(discovery.start_discovery().unwrap()).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(DiscoveryError::DiscoveryFailed(_))));
        assert!(registry.contains("A"));
        assert!(!registry.contains("B"));

        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::DeviceDiscovered(named("A", "Foo"))
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::DiscoveryFailed(_)
        ));

        tokio::task::yield_now().await;
        assert!(!discovery.is_discovering());
    }

    #[tokio::test]
    async fn test_scan_refused_to_start() {
        let transport = Arc::new(MockTransport::new());
        transport.scan_fails_to_start.store(true, Ordering::SeqCst);
        let (discovery, _registry) = session(transport);

        let items = collect(discovery.start_discovery().unwrap()).await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[tokio::test]
    async fn test_pass_bounded_by_timeout() {
        let transport = Arc::new(MockTransport::new().with_scan(vec![
            Ok(named("A", "Fast")),
            Ok(named("B", "Slow")),
        ]));
        *transport.scan_step.lock() = Duration::from_millis(100);
        let registry = DeviceRegistry::new();
        let discovery = DiscoverySession::new(
            transport,
            registry.clone(),
            EventBus::new(),
            Duration::from_millis(150),
        );

        let items = collect(discovery.start_discovery().unwrap()).await;
        assert_eq!(items.len(), 1);
        assert!(!registry.contains("B"));
    }

    #[tokio::test]
    async fn test_stop_discovery_allows_new_pass() {
        let transport = Arc::new(MockTransport::new().with_scan(vec![Ok(named("A", "Foo"))]));
        *transport.scan_step.lock() = Duration::from_secs(10);
        let (discovery, _registry) = session(transport);

        let pass = discovery.start_discovery().unwrap();
        discovery.stop_discovery();
        assert!(!discovery.is_discovering());
        assert!(collect(pass).await.is_empty());

        assert!(discovery.start_discovery().is_some());
    }

    #[tokio::test]
    async fn test_refresh_known_devices_merges_into_registry() {
        let transport = Arc::new(
            MockTransport::new().with_paired(vec![named("P1", "Printer"), named("P2", "Scale")]),
        );
        let (discovery, registry) = session(transport);

        let devices = discovery.refresh_known_devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert!(registry.contains("P1"));
        assert!(registry.contains("P2"));
    }
}
