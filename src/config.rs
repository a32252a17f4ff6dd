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

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::{Context, Result};
use bluer::Address;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bluetooth::{SessionOptions, DEFAULT_READ_BUFFER};

const APP_DIR: &str = "hc06-terminal";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Session settings.
    pub session: SessionConfig,

    /// Terminal settings.
    pub terminal: TerminalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Address of the device to connect to at startup.
    pub device_address: Option<String>,

    /// Bonded device to pick when no address is set (case-insensitive).
    pub name_filter: String,

    /// Fixed RFCOMM channel. Unset resolves the SPP service by UUID.
    pub rfcomm_channel: Option<u8>,

    /// Length of a live scan in seconds.
    pub scan_duration_secs: u64,

    /// Bound on connection attempts in milliseconds. Unset waits forever.
    pub connect_timeout_ms: Option<u64>,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            device_address: None,
            name_filter: "HC-06".to_string(),
            rfcomm_channel: None,
            scan_duration_secs: 12,
            connect_timeout_ms: None,
        }
    }
}

impl BluetoothConfig {
    /// Parsed `device_address`, if set.
    pub fn address(&self) -> Result<Option<Address>> {
        self.device_address
            .as_deref()
            .map(|s| {
                s.parse::<Address>()
                    .with_context(|| format!("invalid device address: {}", s))
            })
            .transpose()
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum bytes per receive call.
    pub read_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Appended to every line typed into the terminal.
    pub line_ending: String,

    /// Prefix log lines with the local time.
    pub timestamps: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            line_ending: "\r\n".to_string(),
            timestamps: true,
        }
    }
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Load configuration from the default location or create it.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config = toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Options for a new serial session.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            read_buffer_size: self.session.read_buffer_size,
            connect_timeout: self.bluetooth.connect_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bluetooth.name_filter, "HC-06");
        assert_eq!(config.bluetooth.rfcomm_channel, None);
        assert_eq!(config.session.read_buffer_size, 1024);
        assert_eq!(config.terminal.line_ending, "\r\n");

        let options = config.session_options();
        assert_eq!(options.read_buffer_size, 1024);
        assert!(options.connect_timeout.is_none());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.bluetooth.scan_duration_secs, 12);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[bluetooth]\ndevice_address = \"98:D3:31:F5:12:34\"\nconnect_timeout_ms = 5000\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(
            config.bluetooth.address().unwrap().unwrap().to_string(),
            "98:D3:31:F5:12:34"
        );
        assert_eq!(config.bluetooth.name_filter, "HC-06");
        assert_eq!(config.terminal.line_ending, "\r\n");
        assert_eq!(
            config.session_options().connect_timeout,
            Some(Duration::from_millis(5000))
        );
    }

    #[test]
    fn test_invalid_address_is_an_error() {
        let config = Config {
            bluetooth: BluetoothConfig {
                device_address: Some("not-an-address".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.bluetooth.address().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.bluetooth.rfcomm_channel = Some(1);
        config.terminal.timestamps = false;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.bluetooth.rfcomm_channel, Some(1));
        assert!(!loaded.terminal.timestamps);
    }
}
