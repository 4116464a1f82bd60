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

//! Delivery controller.
//!
//! The controller is the only entry point for "send this code". It owns the
//! retry policy and the lifecycle of the one active session. All of its
//! state is touched from a single task: commands and session outcomes are
//! funnelled through [`DeliveryController::run`].

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::outcome::{result_channel, OutcomeKind, OutcomeReceiver, PostedOutcome, ResultSender};
use super::session::{DeliverySession, SessionHandle};
use super::{DeliveryRequest, DeliveryTiming, SessionId};
use crate::bluetooth::{self, Connector, DeviceAddress};
use crate::config::SettingsSource;
use crate::power::WakeLock;
use crate::state::{DeliveryStatus, StatusSink};

/// Commands accepted by the controller.
#[derive(Debug)]
pub enum Command {
    /// Deliver a code to the configured device.
    PushCode(String),
    /// Cancel the active session.
    Stop,
    /// Reply with the last code received.
    CopyLastCode(oneshot::Sender<Option<String>>),
    /// Deliver the last code again.
    RetrySend,
    /// Connect once and close, to trigger pairing on the host.
    ProbePairing(DeviceAddress),
    /// Cancel the active session and leave the loop.
    Shutdown,
}

pub struct DeliveryController {
    connector: Arc<dyn Connector>,
    settings: Arc<dyn SettingsSource>,
    sink: Arc<dyn StatusSink>,
    wake_lock: WakeLock,
    timing: DeliveryTiming,
    last_code: Option<String>,
    active: Option<SessionHandle>,
    next_session: u64,
    results: ResultSender,
    outcomes: Option<OutcomeReceiver>,
}

impl DeliveryController {
    pub fn new(
        connector: Arc<dyn Connector>,
        settings: Arc<dyn SettingsSource>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        let (results, outcomes) = result_channel();
        Self {
            connector,
            settings,
            sink,
            wake_lock: WakeLock::new("bluepass::delivery"),
            timing: DeliveryTiming::default(),
            last_code: None,
            active: None,
            next_session: 1,
            results,
            outcomes: Some(outcomes),
        }
    }

    pub fn with_timing(mut self, timing: DeliveryTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_wake_lock(mut self, wake_lock: WakeLock) -> Self {
        self.wake_lock = wake_lock;
        self
    }

    pub fn wake_lock(&self) -> &WakeLock {
        &self.wake_lock
    }

    pub fn timing(&self) -> DeliveryTiming {
        self.timing
    }

    /// The code most recently handed to [`start`](Self::start).
    pub fn last_code(&self) -> Option<&str> {
        self.last_code.as_deref()
    }

    /// Id of the active session, if any.
    pub fn active_session(&self) -> Option<SessionId> {
        self.active.as_ref().map(SessionHandle::id)
    }

    /// Take the outcome receiver to drive [`on_outcome`](Self::on_outcome)
    /// by hand instead of through [`run`](Self::run).
    ///
    /// The channel holds [`RESULT_CHANNEL_CAPACITY`](super::RESULT_CHANNEL_CAPACITY)
    /// outcomes. Aborted outcomes are dropped once it is full, but a finished
    /// session waits for room to post, and [`stop`](Self::stop) waits for
    /// that session. Callers must keep receiving while they issue commands.
    pub fn take_outcomes(&mut self) -> Option<OutcomeReceiver> {
        self.outcomes.take()
    }

    /// Deliver `code` to the configured device with the full retry budget.
    pub async fn start(&mut self, code: impl Into<String>) {
        let code = code.into();
        self.last_code = Some(code.clone());
        self.sink.report(DeliveryStatus::Pending(code.clone()));

        let Some(target) = self.settings.target_device() else {
            info!("Bluetooth address not configured, skip sending '{}'", code);
            self.sink.report(DeliveryStatus::NotConfigured);
            return;
        };

        self.restart(target.address, code, self.timing.max_retries)
            .await;
    }

    /// Replace any active session with a new one.
    pub async fn restart(&mut self, address: DeviceAddress, code: String, retries_remaining: u32) {
        self.stop().await;

        let id = SessionId(self.next_session);
        self.next_session += 1;

        debug!("Defer work to session {}", id);
        let wake = self.wake_lock.acquire();
        let request = DeliveryRequest::new(address, code, retries_remaining);
        let session = DeliverySession::new(id, request, self.timing, self.connector.clone());
        let handle = session.spawn(self.results.for_session(id, Some(wake)));

        self.active = Some(handle);
    }

    /// Cancel the active session and wait until its task has ended.
    ///
    /// Safe to call when nothing is active.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.active.take() {
            debug!("Stopping session {}", handle.id());
            handle.stop().await;
        }
    }

    /// Apply the retry policy to a finished session.
    ///
    /// The wake guard carried by `posted` is released when this returns.
    pub async fn on_outcome(&mut self, posted: PostedOutcome) {
        let outcome = &posted.outcome;

        if self.active.as_ref().map(SessionHandle::id) != Some(outcome.session) {
            debug!(
                "Discarding {:?} from stale session {}",
                outcome.kind, outcome.session
            );
            return;
        }
        if let Some(handle) = self.active.take() {
            handle.join().await;
        }

        match outcome.kind {
            OutcomeKind::Success => {
                info!("Code '{}' sent", outcome.code);
                self.sink.report(DeliveryStatus::Success(outcome.code.clone()));
            }
            OutcomeKind::Aborted => {
                warn!("Session {} has been aborted", outcome.session);
            }
            OutcomeKind::Failure if outcome.retries_remaining > 0 => {
                warn!("Failed to send code '{}' to bluetooth device", outcome.code);
                let max = self.timing.max_retries;
                self.sink.report(DeliveryStatus::FailedRetrying {
                    code: outcome.code.clone(),
                    attempt: max.saturating_sub(outcome.retries_remaining) + 1,
                    max,
                });

                match self.settings.target_device() {
                    Some(target) => {
                        self.restart(
                            target.address,
                            outcome.code.clone(),
                            outcome.retries_remaining - 1,
                        )
                        .await;
                    }
                    None => {
                        warn!("Target device disappeared, giving up on '{}'", outcome.code);
                        self.sink
                            .report(DeliveryStatus::FailedFinal(outcome.code.clone()));
                    }
                }
            }
            OutcomeKind::Failure => {
                error!("Giving up on code '{}', no retries left", outcome.code);
                self.sink
                    .report(DeliveryStatus::FailedFinal(outcome.code.clone()));
            }
        }
    }

    /// Deliver the last code again.
    pub async fn retry(&mut self) {
        match self.last_code.clone().filter(|code| !code.is_empty()) {
            Some(code) => self.start(code).await,
            None => warn!("No last code has been received before"),
        }
    }

    /// Connect to `address` once and close, on a task of its own.
    pub fn probe_pairing(&self, address: DeviceAddress) {
        info!("Probe a connection to {} to start pairing process", address);
        let connector = self.connector.clone();
        tokio::spawn(async move {
            match bluetooth::probe(connector.as_ref(), address).await {
                Ok(()) => info!("Probe connection to {} succeeded", address),
                Err(e) => warn!("Probe connection to {} failed: {:#}", address, e),
            }
        });
    }

    /// Handle one command. Returns `false` once the controller should exit.
    pub async fn handle_command(&mut self, command: Command) -> bool {
        debug!("Handling command {:?}", command);
        match command {
            Command::PushCode(code) => self.start(code).await,
            Command::Stop => self.stop().await,
            Command::CopyLastCode(reply) => {
                if reply.send(self.last_code.clone()).is_err() {
                    debug!("Nobody waiting for the last code");
                }
            }
            Command::RetrySend => self.retry().await,
            Command::ProbePairing(address) => self.probe_pairing(address),
            Command::Shutdown => {
                info!("Shutdown requested");
                self.stop().await;
                return false;
            }
        }
        true
    }

    /// Serve commands and session outcomes until shutdown.
    ///
    /// Ends on [`Command::Shutdown`] or when every command sender is gone.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let Some(mut outcomes) = self.outcomes.take() else {
            error!("Outcome receiver already taken, controller cannot run");
            return;
        };

        info!("Delivery controller running ({})", self.connector.backend_name());
        loop {
            tokio::select! {
                biased;
                Some(posted) = outcomes.recv() => {
                    self.on_outcome(posted).await;
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("Command channel closed");
                        self.stop().await;
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
            }
        }

        // Drain what the stopped session posted so its wake guard is released.
        while let Some(posted) = outcomes.try_recv() {
            self.on_outcome(posted).await;
        }
        info!("Delivery controller stopped");
    }
}
