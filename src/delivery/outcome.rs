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

//! Result channel from delivery sessions back to the controller.
//!
//! Every session gets its own [`OutcomeSender`]; posting consumes it, so a
//! session can report at most once. The wake guard taken when the session
//! was dispatched rides along with the outcome and is released when the
//! controller drops the [`PostedOutcome`].

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use super::SessionId;
use crate::power::WakeGuard;

/// Outcomes that may queue up before the controller drains them.
pub const RESULT_CHANNEL_CAPACITY: usize = 8;

/// Terminal classification of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    Failure,
    Aborted,
}

/// Terminal result of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub session: SessionId,
    pub kind: OutcomeKind,
    pub code: String,
    pub retries_remaining: u32,
}

/// An outcome in transit, holding the session's wake guard.
#[derive(Debug)]
pub struct PostedOutcome {
    pub outcome: DeliveryOutcome,
    wake: Option<WakeGuard>,
}

impl PostedOutcome {
    pub(crate) fn new(outcome: DeliveryOutcome, wake: Option<WakeGuard>) -> Self {
        Self { outcome, wake }
    }

    /// Whether this outcome still holds a wake guard.
    pub fn holds_wake_guard(&self) -> bool {
        self.wake.is_some()
    }
}

/// Creates per-session senders for one controller.
#[derive(Debug, Clone)]
pub struct ResultSender {
    tx: mpsc::Sender<PostedOutcome>,
}

impl ResultSender {
    /// Sender for a single session.
    pub fn for_session(&self, session: SessionId, wake: Option<WakeGuard>) -> OutcomeSender {
        OutcomeSender {
            tx: self.tx.clone(),
            session,
            wake,
        }
    }
}

/// Posts the outcome of exactly one session.
#[derive(Debug)]
pub struct OutcomeSender {
    tx: mpsc::Sender<PostedOutcome>,
    session: SessionId,
    wake: Option<WakeGuard>,
}

impl OutcomeSender {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Hand the outcome to the controller.
    ///
    /// An aborted session has already been replaced, so its outcome is only
    /// queued if there is room; it never waits for capacity.
    pub async fn post(self, kind: OutcomeKind, code: String, retries_remaining: u32) {
        let session = self.session;
        let posted = PostedOutcome::new(
            DeliveryOutcome {
                session: self.session,
                kind,
                code,
                retries_remaining,
            },
            self.wake,
        );
        if kind == OutcomeKind::Aborted {
            match self.tx.try_send(posted) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!("Result channel full, dropping aborted outcome of session {}", session);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Controller gone, dropping outcome of session {}", session);
                }
            }
            return;
        }

        if self.tx.send(posted).await.is_err() {
            debug!("Controller gone, dropping outcome of session {}", session);
        }
    }
}

/// Controller end of the result channel.
#[derive(Debug)]
pub struct OutcomeReceiver {
    rx: mpsc::Receiver<PostedOutcome>,
}

impl OutcomeReceiver {
    /// Next outcome, in the order sessions posted them.
    pub async fn recv(&mut self) -> Option<PostedOutcome> {
        self.rx.recv().await
    }

    /// Next outcome if one is already queued.
    pub fn try_recv(&mut self) -> Option<PostedOutcome> {
        self.rx.try_recv().ok()
    }
}

/// Create a bounded result channel.
pub fn result_channel() -> (ResultSender, OutcomeReceiver) {
    let (tx, rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
    (ResultSender { tx }, OutcomeReceiver { rx })
}
