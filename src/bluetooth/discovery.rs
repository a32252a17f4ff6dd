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

//! Device discovery: bonded peers and live scans.

use anyhow::Result;
use bluer::{Adapter, AdapterEvent};
use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::device::DeviceRef;

/// Events pushed by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A device not yet reported by this scan.
    DeviceFound(DeviceRef),
    /// The scan ended (timeout, cancellation or adapter stop).
    ScanFinished,
}

/// Handle to a running scan.
pub struct ScanHandle {
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ScanHandle {
    /// Stop the scan. `ScanFinished` is still delivered.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Power the adapter on if needed.
pub async fn ensure_powered(adapter: &Adapter) -> Result<()> {
    if adapter.is_powered().await? {
        info!("Bluetooth adapter {} already powered", adapter.name());
    } else {
        info!("Powering on Bluetooth adapter...");
        adapter.set_powered(true).await?;
    }
    Ok(())
}

/// Peers with an existing bond.
pub async fn bonded_devices(adapter: &Adapter) -> Result<Vec<DeviceRef>> {
    let mut devices = Vec::new();

    for addr in adapter.device_addresses().await? {
        let device = adapter.device(addr)?;
        if device.is_paired().await? {
            let name = device.name().await.unwrap_or(None);
            devices.push(DeviceRef::new(addr, name));
        }
    }

    if devices.is_empty() {
        info!("No bonded devices. Pair the HC-06 first (PIN 1234 or 0000)");
    } else {
        info!("Found {} bonded devices", devices.len());
    }
    Ok(devices)
}

/// First device whose name contains `filter`, ignoring case.
pub fn find_by_name<'a>(devices: &'a [DeviceRef], filter: &str) -> Option<&'a DeviceRef> {
    let filter = filter.to_lowercase();
    devices.iter().find(|d| {
        d.name
            .as_deref()
            .map(|n| n.to_lowercase().contains(&filter))
            .unwrap_or(false)
    })
}

/// Start a live scan that runs for at most `duration`.
pub async fn scan(
    adapter: &Adapter,
    duration: Duration,
) -> Result<(ScanHandle, mpsc::Receiver<DiscoveryEvent>)> {
    let events = adapter.discover_devices().await?;
    info!("Scanning for {:?}...", duration);

    let adapter = adapter.clone();
    let found = events.filter_map(move |event| {
        let adapter = adapter.clone();
        async move {
            match event {
                AdapterEvent::DeviceAdded(addr) => {
                    let name = match adapter.device(addr) {
                        Ok(device) => device.name().await.unwrap_or(None),
                        Err(e) => {
                            warn!("Cannot query device {}: {}", addr, e);
                            None
                        }
                    };
                    Some(DeviceRef::new(addr, name))
                }
                _ => None,
            }
        }
    });

    Ok(spawn_scan(found, duration))
}

/// Forward devices from `found` until it ends, `duration` elapses or the
/// scan is cancelled. Each address is reported once.
pub fn spawn_scan<S>(found: S, duration: Duration) -> (ScanHandle, mpsc::Receiver<DiscoveryEvent>)
where
    S: Stream<Item = DeviceRef> + Send + 'static,
{
    let (event_tx, event_rx) = mpsc::channel(32);
    let (cancel_tx, mut cancel_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut found = Box::pin(found);
        let mut seen = HashSet::new();
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    debug!("Scan cancelled");
                    break;
                }
                _ = &mut deadline => {
                    debug!("Scan duration elapsed");
                    break;
                }
                next = found.next() => match next {
                    Some(device) => {
                        if seen.insert(device.address) {
                            info!("Found device: {}", device);
                            if event_tx.send(DiscoveryEvent::DeviceFound(device)).await.is_err() {
                                return;
                            }
                        }
                    }
                    None => break,
                }
            }
        }

        info!("Scan finished ({} devices)", seen.len());
        let _ = event_tx.send(DiscoveryEvent::ScanFinished).await;
    });

    let handle = ScanHandle {
        cancel: Some(cancel_tx),
        task,
    };
    (handle, event_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(addr: &str, name: Option<&str>) -> DeviceRef {
        DeviceRef::new(addr.parse().unwrap(), name.map(str::to_string))
    }

    #[test]
    fn test_find_by_name_case_insensitive() {
        let devices = vec![
            dev("00:11:22:33:44:55", Some("Headset")),
            dev("00:11:22:33:44:66", None),
            dev("98:D3:31:F5:12:34", Some("my hc-06 board")),
        ];

        let found = find_by_name(&devices, "HC-06").unwrap();
        assert_eq!(found.address.to_string(), "98:D3:31:F5:12:34");
        assert!(find_by_name(&devices, "HC-05").is_none());
    }

    #[tokio::test]
    async fn test_scan_reports_each_address_once() {
        let found = futures::stream::iter(vec![
            dev("98:D3:31:F5:12:34", Some("HC-06")),
            dev("00:11:22:33:44:55", None),
            dev("98:D3:31:F5:12:34", Some("HC-06")),
        ]);

        let (_handle, mut events) = spawn_scan(found, Duration::from_secs(5));

        let mut received = Vec::new();
        while let Some(event) = events.recv().await {
            received.push(event);
        }

        assert_eq!(received.len(), 3);
        assert_eq!(
            received[0],
            DiscoveryEvent::DeviceFound(dev("98:D3:31:F5:12:34", Some("HC-06")))
        );
        assert_eq!(
            received[1],
            DiscoveryEvent::DeviceFound(dev("00:11:22:33:44:55", None))
        );
        assert_eq!(received[2], DiscoveryEvent::ScanFinished);
    }

    #[tokio::test]
    async fn test_cancel_finishes_scan() {
        let found = futures::stream::pending::<DeviceRef>();
        let (mut handle, mut events) = spawn_scan(found, Duration::from_secs(60));

        handle.cancel();
        assert_eq!(events.recv().await, Some(DiscoveryEvent::ScanFinished));
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn test_scan_times_out() {
        let found = futures::stream::pending::<DeviceRef>();
        let (_handle, mut events) = spawn_scan(found, Duration::from_millis(10));

        assert_eq!(events.recv().await, Some(DiscoveryEvent::ScanFinished));
    }
}
