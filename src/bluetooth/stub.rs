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

//! Scripted connector for dry runs and tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

use super::link::{Connector, Link};
use super::DeviceAddress;

/// What a single connect attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubBehavior {
    /// Connect, and accept writes.
    Accept,
    /// Connect, but fail every write.
    FailWrite,
    /// Connect, but never finish a write.
    HangWrite,
    /// Fail to connect.
    Refuse,
    /// Never finish connecting.
    Hang,
}

#[derive(Default)]
struct StubShared {
    script: Mutex<VecDeque<StubBehavior>>,
    written: Mutex<Vec<(DeviceAddress, Vec<u8>)>>,
    attempts: AtomicUsize,
    open_links: AtomicUsize,
    pending_connects: AtomicUsize,
    max_pending_connects: AtomicUsize,
}

/// Connector that follows a script instead of touching hardware.
///
/// Each connect attempt pops the next [`StubBehavior`]; once the script is
/// empty the fallback behaviour applies.
#[derive(Clone)]
pub struct StubConnector {
    fallback: StubBehavior,
    shared: Arc<StubShared>,
}

impl StubConnector {
    /// A connector whose every attempt behaves like `fallback`.
    pub fn new(fallback: StubBehavior) -> Self {
        Self {
            fallback,
            shared: Arc::default(),
        }
    }

    /// A connector that always connects and accepts writes.
    pub fn accepting() -> Self {
        Self::new(StubBehavior::Accept)
    }

    /// Queue behaviours for the next attempts.
    pub fn with_script(self, script: impl IntoIterator<Item = StubBehavior>) -> Self {
        self.shared.script.lock().extend(script);
        self
    }

    /// Number of connect attempts so far.
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Everything written, in order.
    pub fn written(&self) -> Vec<(DeviceAddress, Vec<u8>)> {
        self.shared.written.lock().clone()
    }

    /// Links handed out and not yet closed.
    pub fn open_links(&self) -> usize {
        self.shared.open_links.load(Ordering::SeqCst)
    }

    /// Connect attempts currently in progress.
    pub fn pending_connects(&self) -> usize {
        self.shared.pending_connects.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous connect attempts seen.
    pub fn max_pending_connects(&self) -> usize {
        self.shared.max_pending_connects.load(Ordering::SeqCst)
    }

    fn next_behavior(&self) -> StubBehavior {
        self.shared.script.lock().pop_front().unwrap_or(self.fallback)
    }
}

/// Tracks one in-progress connect attempt; dropped when it ends or is abandoned.
struct PendingConnect(Arc<StubShared>);

impl PendingConnect {
    fn begin(shared: &Arc<StubShared>) -> Self {
        let now = shared.pending_connects.fetch_add(1, Ordering::SeqCst) + 1;
        shared.max_pending_connects.fetch_max(now, Ordering::SeqCst);
        Self(shared.clone())
    }
}

impl Drop for PendingConnect {
    fn drop(&mut self) {
        self.0.pending_connects.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for StubConnector {
    fn backend_name(&self) -> &'static str {
        "Stub (no-op)"
    }

    async fn connect(&self, address: DeviceAddress) -> Result<Box<dyn Link>> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        let _pending = PendingConnect::begin(&self.shared);

        let behavior = self.next_behavior();
        match behavior {
            StubBehavior::Refuse => Err(anyhow!("[STUB] connection to {address} refused")),
            StubBehavior::Hang => std::future::pending().await,
            StubBehavior::Accept | StubBehavior::FailWrite | StubBehavior::HangWrite => {
                info!("[STUB] Connected to {}", address);
                self.shared.open_links.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(StubLink {
                    address,
                    behavior,
                    shared: self.shared.clone(),
                }))
            }
        }
    }
}

struct StubLink {
    address: DeviceAddress,
    behavior: StubBehavior,
    shared: Arc<StubShared>,
}

#[async_trait]
impl Link for StubLink {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self.behavior {
            StubBehavior::FailWrite => {
                return Err(anyhow!("[STUB] write to {} failed", self.address));
            }
            StubBehavior::HangWrite => std::future::pending::<()>().await,
            _ => {}
        }
        info!(
            "[STUB] Would send to {}: {:?}",
            self.address,
            String::from_utf8_lossy(data)
        );
        self.shared.written.lock().push((self.address, data.to_vec()));
        Ok(())
    }

    fn close(self: Box<Self>) {
        self.shared.open_links.fetch_sub(1, Ordering::SeqCst);
    }
}
