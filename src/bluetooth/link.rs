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

//! Connection abstraction used by the delivery pipeline.
//!
//! The pipeline only needs a connection-oriented byte stream to one remote
//! device. [`Connector`] opens one, [`Link`] writes to it.

use anyhow::Result;
use async_trait::async_trait;

use super::DeviceAddress;

/// Opens stream connections to remote devices.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Get the backend name (e.g., "RFCOMM", "Stub").
    fn backend_name(&self) -> &'static str;

    /// Open a fresh connection to `address`.
    ///
    /// Dropping the returned future abandons the attempt and releases any
    /// socket it created.
    async fn connect(&self, address: DeviceAddress) -> Result<Box<dyn Link>>;
}

/// An established connection.
#[async_trait]
pub trait Link: Send {
    /// Write all of `data` and flush it.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Close the connection. Consumes the link so it cannot be closed twice.
    fn close(self: Box<Self>);
}

/// Connect to `address` and close the connection right away.
///
/// Connecting to an unpaired device makes the OS start its pairing dialog,
/// which is all this is for.
pub async fn probe(connector: &dyn Connector, address: DeviceAddress) -> Result<()> {
    let link = connector.connect(address).await?;
    link.close();
    Ok(())
}
