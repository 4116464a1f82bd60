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

//! Keep-alive bracket around background deliveries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Reference-counted keep-alive lock.
///
/// The process should stay awake while any [`WakeGuard`] is alive. Guards
/// release themselves on drop, so every exit path releases exactly once.
#[derive(Debug, Clone)]
pub struct WakeLock {
    tag: &'static str,
    held: Arc<AtomicUsize>,
}

impl WakeLock {
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            held: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Take one hold on the lock.
    #[must_use = "the hold is released as soon as the guard is dropped"]
    pub fn acquire(&self) -> WakeGuard {
        let held = self.held.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Wake lock '{}' acquired (held={})", self.tag, held);
        WakeGuard { lock: self.clone() }
    }

    /// Number of guards currently alive.
    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    pub fn is_held(&self) -> bool {
        self.held() > 0
    }
}

/// One hold on a [`WakeLock`].
#[derive(Debug)]
pub struct WakeGuard {
    lock: WakeLock,
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        let held = self.lock.held.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!("Wake lock '{}' released (held={})", self.lock.tag, held);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guards_count() {
        let lock = WakeLock::new("test");
        assert!(!lock.is_held());

        let a = lock.acquire();
        let b = lock.acquire();
        assert_eq!(lock.held(), 2);

        drop(a);
        assert_eq!(lock.held(), 1);
        drop(b);
        assert!(!lock.is_held());
    }

    #[test]
    fn test_clones_share_count() {
        let lock = WakeLock::new("test");
        let other = lock.clone();
        let _guard = other.acquire();
        assert_eq!(lock.held(), 1);
    }
}
