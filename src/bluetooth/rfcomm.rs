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

//! RFCOMM client backed by BlueZ.
//!
//! By default the remote channel is resolved from the device's service
//! record for [`SERVICE_UUID`]: a client profile is registered with BlueZ,
//! `connect_profile` asks it to look up and dial the service, and the
//! connected socket is handed back through the profile handle. A channel
//! set in the configuration skips the lookup and is dialled directly.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, ReqError, Role, SocketAddr, Stream};
use bluer::{Adapter, Address, Session};
use futures::StreamExt;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::link::{Connector, Link};
use super::{DeviceAddress, SERVICE_UUID};

/// How long to wait for BlueZ to hand over the socket once the profile
/// connection has been reported as established.
const PROFILE_HANDOVER_TIMEOUT: Duration = Duration::from_secs(2);

/// How the remote RFCOMM endpoint is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Look the channel up in the device's service records.
    Service(Uuid),
    /// Dial a fixed channel.
    Channel(u8),
}

impl Route {
    /// The service lookup, unless a channel is forced.
    pub fn from_override(channel: Option<u8>) -> Self {
        match channel {
            Some(channel) => Self::Channel(channel),
            None => Self::Service(SERVICE_UUID),
        }
    }
}

/// Connects to remote devices over RFCOMM.
pub struct RfcommConnector {
    _session: Session,
    adapter: Adapter,
    route: Route,
    profile: Mutex<ProfileHandle>,
}

impl RfcommConnector {
    /// Open a BlueZ session on the default adapter and register the client
    /// profile for [`SERVICE_UUID`].
    pub async fn new(channel: Option<u8>) -> Result<Self> {
        info!("Initializing Bluetooth connector...");

        let session = Session::new().await?;
        debug!("BlueZ session created");

        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        // Ensure adapter is powered on
        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }

        let profile = session
            .register_profile(Profile {
                uuid: SERVICE_UUID,
                role: Some(Role::Client),
                ..Default::default()
            })
            .await
            .context("Failed to register RFCOMM client profile")?;

        let route = Route::from_override(channel);
        info!("RFCOMM route: {:?}", route);

        Ok(Self {
            _session: session,
            adapter,
            route,
            profile: Mutex::new(profile),
        })
    }

    /// Get the adapter address.
    pub async fn address(&self) -> Result<Address> {
        Ok(self.adapter.address().await?)
    }

    /// Devices the adapter is paired with.
    pub async fn paired_devices(&self) -> Result<Vec<PairedDevice>> {
        let mut devices = Vec::new();

        for addr in self.adapter.device_addresses().await? {
            let device = self.adapter.device(addr)?;
            if !device.is_paired().await? {
                continue;
            }
            let name = device.alias().await.unwrap_or_else(|_| addr.to_string());
            let offers_service = device
                .uuids()
                .await?
                .map(|uuids| uuids.contains(&SERVICE_UUID))
                .unwrap_or(false);
            devices.push(PairedDevice {
                address: DeviceAddress::from(addr.0),
                name,
                offers_service,
            });
        }

        Ok(devices)
    }

    async fn connect_channel(&self, address: DeviceAddress, channel: u8) -> Result<Stream> {
        debug!("Connecting to {} on channel {}", address, channel);
        let target = SocketAddr::new(Address::new(address.octets()), channel);
        Stream::connect(target)
            .await
            .with_context(|| format!("RFCOMM connect to {address} on channel {channel} failed"))
    }

    async fn connect_service(&self, address: DeviceAddress, uuid: Uuid) -> Result<Stream> {
        let device = self.adapter.device(Address::new(address.octets()))?;
        // One profile connection at a time, so a handed-over socket always
        // belongs to the attempt waiting for it.
        let mut profile = self.profile.lock().await;

        debug!("Connecting to {} by service {}", address, uuid);
        tokio::select! {
            request = profile.next() => accept(request, address),
            result = device.connect_profile(&uuid) => {
                result.with_context(|| format!("Service {uuid} on {address} is not reachable"))?;
                let request = tokio::time::timeout(PROFILE_HANDOVER_TIMEOUT, profile.next())
                    .await
                    .map_err(|_| anyhow!("BlueZ did not hand over the connection to {address}"))?;
                accept(request, address)
            }
        }
    }
}

fn accept(request: Option<bluer::rfcomm::ConnectRequest>, address: DeviceAddress) -> Result<Stream> {
    let Some(request) = request else {
        bail!("RFCOMM profile was unregistered");
    };

    let from = DeviceAddress::from(request.device().0);
    if from != address {
        warn!("Rejecting profile connection from unexpected device {}", from);
        request.reject(ReqError::Rejected);
        bail!("Profile connection came from {from} instead of {address}");
    }

    request
        .accept()
        .map_err(|e| anyhow!("Failed to accept profile connection from {address}: {e:?}"))
}

#[async_trait]
impl Connector for RfcommConnector {
    fn backend_name(&self) -> &'static str {
        "RFCOMM"
    }

    async fn connect(&self, address: DeviceAddress) -> Result<Box<dyn Link>> {
        let stream = match self.route {
            Route::Service(uuid) => self.connect_service(address, uuid).await?,
            Route::Channel(channel) => self.connect_channel(address, channel).await?,
        };
        Ok(Box::new(RfcommLink { stream }))
    }
}

struct RfcommLink {
    stream: Stream,
}

#[async_trait]
impl Link for RfcommLink {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    fn close(self: Box<Self>) {
        // Dropping the stream closes the socket.
        drop(self.stream);
    }
}

#[derive(Debug, Clone)]
pub struct PairedDevice {
    pub address: DeviceAddress,
    pub name: String,
    /// Whether the device advertises [`SERVICE_UUID`].
    pub offers_service: bool,
}
