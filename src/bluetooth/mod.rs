// Copyright 2026 The BluePass Team
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
//! Outbound RFCOMM connections to the device that receives relayed codes.

mod address;
pub mod link;
#[cfg(feature = "bluetooth")]
mod rfcomm;
mod stub;

use uuid::Uuid;

pub use address::{AddressError, DeviceAddress};
pub use link::{probe, Connector, Link};
#[cfg(feature = "bluetooth")]
pub use rfcomm::{PairedDevice, RfcommConnector, Route};
pub use stub::{StubBehavior, StubConnector};

/// Service record the receiving device registers for code delivery.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xe4d56fb3_b86d_4572_9b0d_44d483eb1eee);
