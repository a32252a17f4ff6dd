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

//! Bluetooth communication module.
//!
//! Handles the RFCOMM (SPP) client session to an HC-06 module and device
//! discovery.

mod device;
pub mod discovery;
pub mod mock;
mod session;
mod transport;

pub use device::{DeviceRef, SPP_UUID};
pub use discovery::{DiscoveryEvent, ScanHandle};
pub use session::{
    decode_text, ConnectionState, SerialSession, SessionError, SessionEvent, SessionOptions,
    DEFAULT_READ_BUFFER,
};
pub use transport::{RfcommProvider, RfcommStream, TransportProvider};
