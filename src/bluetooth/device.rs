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

//! Remote peer identifiers.

use bluer::Address;
use std::fmt;
use uuid::Uuid;

/// Standard SPP UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// A remote Bluetooth peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceRef {
    pub address: Address,
    pub name: Option<String>,
}

impl DeviceRef {
    pub fn new(address: Address, name: Option<String>) -> Self {
        Self { address, name }
    }

    /// Name if known, address otherwise.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self.address.to_string(),
        }
    }

    /// List label: `"<name> - <address>"`.
    pub fn label(&self) -> String {
        let name = self
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or("(unnamed)");
        format!("{} - {}", name, self.address)
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Address {
        "98:D3:31:F5:12:34".parse().unwrap()
    }

    #[test]
    fn test_spp_uuid() {
        assert_eq!(
            SPP_UUID.to_string().to_uppercase(),
            "00001101-0000-1000-8000-00805F9B34FB"
        );
    }

    #[test]
    fn test_label_and_display_name() {
        let named = DeviceRef::new(addr(), Some("HC-06".to_string()));
        assert_eq!(named.label(), "HC-06 - 98:D3:31:F5:12:34");
        assert_eq!(named.display_name(), "HC-06");
        assert_eq!(named.to_string(), "HC-06 (98:D3:31:F5:12:34)");

        let anonymous = DeviceRef::new(addr(), None);
        assert_eq!(anonymous.label(), "(unnamed) - 98:D3:31:F5:12:34");
        assert_eq!(anonymous.display_name(), "98:D3:31:F5:12:34");
    }
}
