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

//! Application state management.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::bluetooth::DeviceRef;

/// Log lines kept for display.
const MAX_LOG_LINES: usize = 500;

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Status line.
    pub status: RwLock<String>,

    /// Devices from the last listing or scan, in discovery order.
    pub devices: RwLock<Vec<DeviceRef>>,

    /// Scrolling log.
    pub log: RwLock<VecDeque<String>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            status: RwLock::new("Status: Idle".to_string()),
            devices: RwLock::new(Vec::new()),
            log: RwLock::new(VecDeque::new()),
        }
    }
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_status(&self, status: impl Into<String>) {
        *self.status.write() = status.into();
    }

    pub fn get_status(&self) -> String {
        self.status.read().clone()
    }

    /// Replace the device list.
    pub fn set_devices(&self, devices: Vec<DeviceRef>) {
        let mut list = self.devices.write();
        list.clear();
        for device in devices {
            if !list.iter().any(|d| d.address == device.address) {
                list.push(device);
            }
        }
    }

    pub fn clear_devices(&self) {
        self.devices.write().clear();
    }

    /// Append a device unless its address is already listed.
    pub fn add_device(&self, device: DeviceRef) -> bool {
        let mut list = self.devices.write();
        if list.iter().any(|d| d.address == device.address) {
            return false;
        }
        list.push(device);
        true
    }

    pub fn device_at(&self, index: usize) -> Option<DeviceRef> {
        self.devices.read().get(index).cloned()
    }

    /// Numbered list labels.
    pub fn device_labels(&self) -> Vec<String> {
        self.devices
            .read()
            .iter()
            .enumerate()
            .map(|(i, d)| format!("[{}] {}", i, d.label()))
            .collect()
    }

    pub fn push_log(&self, line: impl Into<String>) {
        let mut log = self.log.write();
        if log.len() == MAX_LOG_LINES {
            log.pop_front();
        }
        log.push_back(line.into());
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.log.read().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(addr: &str, name: Option<&str>) -> DeviceRef {
        DeviceRef::new(addr.parse().unwrap(), name.map(str::to_string))
    }

    #[test]
    fn test_add_device_dedupes_by_address() {
        let state = AppState::new();
        assert!(state.add_device(dev("98:D3:31:F5:12:34", Some("HC-06"))));
        assert!(!state.add_device(dev("98:D3:31:F5:12:34", None)));
        assert!(state.add_device(dev("00:11:22:33:44:55", None)));

        assert_eq!(
            state.device_labels(),
            vec![
                "[0] HC-06 - 98:D3:31:F5:12:34".to_string(),
                "[1] (unnamed) - 00:11:22:33:44:55".to_string(),
            ]
        );
        assert_eq!(state.device_at(1).unwrap().name, None);
        assert!(state.device_at(2).is_none());
    }

    #[test]
    fn test_set_devices_replaces_list() {
        let state = AppState::new();
        state.add_device(dev("00:11:22:33:44:55", None));
        state.set_devices(vec![dev("98:D3:31:F5:12:34", Some("HC-06"))]);

        assert_eq!(state.devices.read().len(), 1);
        assert_eq!(state.device_at(0).unwrap().display_name(), "HC-06");
    }

    #[test]
    fn test_log_is_bounded() {
        let state = AppState::new();
        for i in 0..(MAX_LOG_LINES + 10) {
            state.push_log(format!("line {}", i));
        }

        let lines = state.log_lines();
        assert_eq!(lines.len(), MAX_LOG_LINES);
        assert_eq!(lines[0], "line 10");
    }
}
