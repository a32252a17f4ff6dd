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

//! Event processing and log rendering.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bluetooth::{decode_text, DiscoveryEvent, SessionEvent};
use crate::state::AppState;

/// Turns session and discovery events into status and log lines.
pub struct EventProcessor {
    state: Arc<AppState>,
    timestamps: bool,
}

impl EventProcessor {
    /// Create a new event processor.
    pub fn new(state: Arc<AppState>, timestamps: bool) -> Self {
        Self { state, timestamps }
    }

    /// Process a session event. Returns the log line it produced.
    pub fn process_event(&self, event: &SessionEvent) -> String {
        match event {
            SessionEvent::Connected(device) => {
                info!("Device connected: {}", device);
                self.state
                    .set_status(format!("Status: Connected to {}", device.display_name()));
                self.log(format!("Connected to {}", device))
            }
            SessionEvent::ConnectionFailed(reason) => {
                warn!("Connection failed: {}", reason);
                self.state.set_status("Status: Connection error");
                self.log(format!("Connection error: {}", reason))
            }
            SessionEvent::DataReceived(bytes) => {
                debug!("Received {} bytes", bytes.len());
                self.log(format!("<- {}", decode_text(bytes)))
            }
            SessionEvent::ReadEnded(reason) => {
                info!("Device disconnected: {}", reason);
                self.state.set_status("Status: Disconnected");
                self.log(format!("Read ended: {}", reason))
            }
            SessionEvent::Sent(bytes) => self.log(format!("-> {}", decode_text(bytes))),
            SessionEvent::SendFailed(reason) => {
                warn!("Send failed: {}", reason);
                self.log(format!("Send error: {}", reason))
            }
        }
    }

    /// Process a discovery event. Returns the log line, if any.
    pub fn process_discovery(&self, event: &DiscoveryEvent) -> Option<String> {
        match event {
            DiscoveryEvent::DeviceFound(device) => {
                if self.state.add_device(device.clone()) {
                    let index = self.state.devices.read().len() - 1;
                    Some(self.log(format!("[{}] {}", index, device.label())))
                } else {
                    None
                }
            }
            DiscoveryEvent::ScanFinished => Some(self.log("Scan finished.")),
        }
    }

    /// Record a line in the log.
    pub fn log(&self, line: impl AsRef<str>) -> String {
        let line = line.as_ref().trim_end_matches(['\r', '\n']);
        let line = if self.timestamps {
            format!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), line)
        } else {
            line.to_string()
        };
        self.state.push_log(line.clone());
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::DeviceRef;

    fn hc06() -> DeviceRef {
        DeviceRef::new("98:D3:31:F5:12:34".parse().unwrap(), Some("HC-06".to_string()))
    }

    fn processor() -> (EventProcessor, Arc<AppState>) {
        let state = AppState::new();
        (EventProcessor::new(state.clone(), false), state)
    }

    #[test]
    fn test_connection_lifecycle_updates_status() {
        let (processor, state) = processor();

        let line = processor.process_event(&SessionEvent::Connected(hc06()));
        assert_eq!(line, "Connected to HC-06 (98:D3:31:F5:12:34)");
        assert_eq!(state.get_status(), "Status: Connected to HC-06");

        processor.process_event(&SessionEvent::ReadEnded("link lost".into()));
        assert_eq!(state.get_status(), "Status: Disconnected");

        processor.process_event(&SessionEvent::ConnectionFailed("refused".into()));
        assert_eq!(state.get_status(), "Status: Connection error");
        assert_eq!(state.log_lines().len(), 3);
    }

    #[test]
    fn test_data_lines() {
        let (processor, _state) = processor();

        assert_eq!(
            processor.process_event(&SessionEvent::DataReceived(b"OK\r\n".to_vec())),
            "<- OK"
        );
        assert_eq!(
            processor.process_event(&SessionEvent::Sent(b"AT\r\n".to_vec())),
            "-> AT"
        );
        assert_eq!(
            processor.process_event(&SessionEvent::DataReceived(vec![b'A', 0xFF])),
            "<- A\u{FFFD}"
        );
    }

    #[test]
    fn test_discovery_lists_devices_once() {
        let (processor, state) = processor();
        let found = DiscoveryEvent::DeviceFound(hc06());

        assert_eq!(
            processor.process_discovery(&found).as_deref(),
            Some("[0] HC-06 - 98:D3:31:F5:12:34")
        );
        assert!(processor.process_discovery(&found).is_none());
        assert_eq!(
            processor.process_discovery(&DiscoveryEvent::ScanFinished).as_deref(),
            Some("Scan finished.")
        );
        assert_eq!(state.devices.read().len(), 1);
    }

    #[test]
    fn test_timestamps_prefix() {
        let state = AppState::new();
        let processor = EventProcessor::new(state, true);

        let line = processor.log("hello");
        assert!(line.starts_with('['));
        assert!(line.ends_with("] hello"));
    }
}
