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

//! Terminal commands.
//!
//! Lines starting with `/` control the terminal; anything else is sent to
//! the connected device.

use bluer::Address;

use crate::bluetooth::{discovery, DeviceRef};

/// Target of a `/connect` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    /// First bonded device matching the configured name filter.
    ByName,
    /// Index into the device list.
    Index(usize),
    /// Explicit address.
    Address(Address),
}

/// A parsed terminal line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send the text (line ending is added by the caller).
    Send(String),
    /// List bonded devices.
    Paired,
    /// Start a live scan.
    Scan,
    /// Connect to a device.
    Connect(ConnectTarget),
    /// Close the session.
    Close,
    /// Show status and device list.
    Status,
    Help,
    Quit,
    /// Unknown command or bad argument.
    Invalid(String),
}

impl Command {
    /// Parse a terminal line.
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Command::Send(line.trim_end_matches(['\r', '\n']).to_string());
        };

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or("").to_lowercase();
        let arg = parts.next();

        match name.as_str() {
            "paired" => Command::Paired,
            "scan" => Command::Scan,
            "close" | "disconnect" => Command::Close,
            "status" | "devices" => Command::Status,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "connect" => match arg {
                None => Command::Connect(ConnectTarget::ByName),
                Some(arg) => {
                    if let Ok(index) = arg.parse::<usize>() {
                        Command::Connect(ConnectTarget::Index(index))
                    } else if let Ok(address) = arg.parse::<Address>() {
                        Command::Connect(ConnectTarget::Address(address))
                    } else {
                        Command::Invalid(format!("not a device index or address: {}", arg))
                    }
                }
            },
            other => Command::Invalid(format!("unknown command: /{}", other)),
        }
    }
}

/// Resolve a connect target.
///
/// Indices and addresses refer to the displayed `devices` list, which may
/// hold scan results. The default target is always looked up among the
/// `bonded` devices.
pub fn resolve_target(
    target: &ConnectTarget,
    devices: &[DeviceRef],
    bonded: &[DeviceRef],
    name_filter: &str,
) -> Result<DeviceRef, String> {
    match target {
        ConnectTarget::ByName => discovery::find_by_name(bonded, name_filter)
            .cloned()
            .ok_or_else(|| {
                format!(
                    "{} is not bonded. Use /paired or /scan and pick a device from the list.",
                    name_filter
                )
            }),
        ConnectTarget::Index(index) => devices
            .get(*index)
            .cloned()
            .ok_or_else(|| format!("no device at index {}", index)),
        ConnectTarget::Address(address) => Ok(devices
            .iter()
            .find(|d| d.address == *address)
            .cloned()
            .unwrap_or_else(|| DeviceRef::new(*address, None))),
    }
}

/// Help text.
pub const HELP: &str = "\
Commands:
  /paired            list bonded devices
  /scan              scan for nearby devices
  /connect [n|addr]  connect (default: first bonded device matching the name filter)
  /close             close the connection
  /status            show status and device list
  /quit              exit
Any other line is sent to the device.";
