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

//! One connect-and-write cycle against the target device.
//!
//! A session runs on its own task. It can be cancelled from the controller
//! at any point: cancelling flips the liveness flag, closes the connection
//! if one is parked in the session, and wakes every await point, which then
//! abandon the blocking call and end the session as aborted.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::outcome::{OutcomeKind, OutcomeSender};
use super::{DeliveryRequest, DeliveryTiming, SessionId};
use crate::bluetooth::{Connector, Link};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Connecting,
    Connected,
    Writing,
    Succeeded,
    Failed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }
}

/// The session was cancelled.
#[derive(Debug)]
struct Aborted;

/// Fields shared between the worker and whoever cancels it.
struct SessionShared {
    running: bool,
    state: SessionState,
    link: Option<Box<dyn Link>>,
}

struct SessionControl {
    shared: Mutex<SessionShared>,
    cancel_tx: watch::Sender<bool>,
}

impl SessionControl {
    fn cancel(&self) {
        {
            let mut shared = self.shared.lock();
            shared.running = false;
            if let Some(link) = shared.link.take() {
                debug!("Closing connection of cancelled session");
                link.close();
            }
        }
        self.cancel_tx.send_replace(true);
    }
}

/// Cancels a session from outside its task.
#[derive(Clone)]
pub struct SessionCanceller {
    control: Arc<SessionControl>,
}

impl SessionCanceller {
    /// Request the session to stop. Safe to call any number of times.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn state(&self) -> SessionState {
        self.control.shared.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.control.shared.lock().running
    }
}

/// One delivery attempt sequence for a [`DeliveryRequest`].
pub struct DeliverySession {
    id: SessionId,
    request: DeliveryRequest,
    timing: DeliveryTiming,
    connector: Arc<dyn Connector>,
    control: Arc<SessionControl>,
    cancel_rx: watch::Receiver<bool>,
}

impl DeliverySession {
    pub fn new(
        id: SessionId,
        request: DeliveryRequest,
        timing: DeliveryTiming,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            id,
            request,
            timing,
            connector,
            control: Arc::new(SessionControl {
                shared: Mutex::new(SessionShared {
                    running: true,
                    state: SessionState::Created,
                    link: None,
                }),
                cancel_tx,
            }),
            cancel_rx,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn request(&self) -> &DeliveryRequest {
        &self.request
    }

    pub fn canceller(&self) -> SessionCanceller {
        SessionCanceller {
            control: self.control.clone(),
        }
    }

    /// Run the session on its own task and post the outcome when done.
    pub fn spawn(self, outcome: OutcomeSender) -> SessionHandle {
        let id = self.id;
        let canceller = self.canceller();
        let span = info_span!("session", id = %id);

        let task = tokio::spawn(
            async move {
                let code = self.request.code.clone();
                let retries_remaining = self.request.retries_remaining;
                let kind = self.run().await;
                debug!("Posting {:?} for code '{}'", kind, code);
                outcome.post(kind, code, retries_remaining).await;
            }
            .instrument(span),
        );

        SessionHandle {
            id,
            canceller,
            task,
        }
    }

    /// Connect, write the code once and report how it went.
    ///
    /// The connection is closed before this returns, whatever the outcome.
    pub async fn run(mut self) -> OutcomeKind {
        info!(
            "Sending code '{}' to {} ({} retries left)",
            self.request.code, self.request.address, self.request.retries_remaining
        );

        let kind = match self.run_for_result().await {
            Ok(true) => OutcomeKind::Success,
            Ok(false) => OutcomeKind::Failure,
            Err(Aborted) => {
                info!("Aborting delivery session");
                OutcomeKind::Aborted
            }
        };

        self.finish(kind);
        kind
    }

    async fn run_for_result(&mut self) -> Result<bool, Aborted> {
        if !self.connect_with_retry().await? {
            return Ok(false);
        }
        self.write_code().await
    }

    async fn connect_with_retry(&mut self) -> Result<bool, Aborted> {
        let attempts = self.timing.max_connect_attempts.max(1);

        for attempt in 1..=attempts {
            if attempt > 1 {
                self.pause().await?;
            }
            if self.try_connect(attempt).await? {
                debug!("Socket is connected (attempt={})", attempt);
                return Ok(true);
            }
        }

        error!("Failed to connect after {} attempts", attempts);
        Ok(false)
    }

    async fn try_connect(&mut self, attempt: u32) -> Result<bool, Aborted> {
        self.begin_connect()?;

        let address = self.request.address;
        let result = tokio::select! {
            biased;
            _ = cancelled(&mut self.cancel_rx) => return Err(Aborted),
            result = self.connector.connect(address) => result,
        };

        match result {
            Ok(link) => {
                self.park_link(link)?;
                Ok(true)
            }
            Err(e) => {
                debug!("Connect attempt {} failed: {:#}", attempt, e);
                self.check_running()?;
                Ok(false)
            }
        }
    }

    async fn pause(&mut self) -> Result<(), Aborted> {
        let delay = self.timing.connect_retry_delay();
        tokio::select! {
            biased;
            _ = cancelled(&mut self.cancel_rx) => Err(Aborted),
            _ = tokio::time::sleep(delay) => self.check_running(),
        }
    }

    async fn write_code(&mut self) -> Result<bool, Aborted> {
        let Some(mut link) = self.take_link_for_write()? else {
            warn!("No connection to write to");
            return Ok(false);
        };

        let payload = self.request.payload();
        let result = tokio::select! {
            biased;
            _ = cancelled(&mut self.cancel_rx) => None,
            result = link.send(&payload) => Some(result),
        };
        link.close();

        match result {
            None => Err(Aborted),
            Some(Ok(())) => {
                debug!("Code '{}' has been written", self.request.code);
                self.check_running()?;
                Ok(true)
            }
            Some(Err(e)) => {
                error!("Failed to send code to remote device: {:#}", e);
                self.check_running()?;
                Ok(false)
            }
        }
    }

    fn check_running(&self) -> Result<(), Aborted> {
        if self.control.shared.lock().running {
            Ok(())
        } else {
            warn!("Session was requested to be aborted");
            Err(Aborted)
        }
    }

    /// Enter `Connecting`, discarding the link of an earlier attempt.
    fn begin_connect(&self) -> Result<(), Aborted> {
        let mut shared = self.control.shared.lock();
        if !shared.running {
            drop(shared);
            warn!("Session was requested to be aborted");
            return Err(Aborted);
        }
        if let Some(stale) = shared.link.take() {
            stale.close();
        }
        shared.state = SessionState::Connecting;
        Ok(())
    }

    /// Store a fresh link where `cancel` can reach it.
    fn park_link(&self, link: Box<dyn Link>) -> Result<(), Aborted> {
        let mut shared = self.control.shared.lock();
        if !shared.running {
            link.close();
            return Err(Aborted);
        }
        shared.link = Some(link);
        shared.state = SessionState::Connected;
        Ok(())
    }

    fn take_link_for_write(&self) -> Result<Option<Box<dyn Link>>, Aborted> {
        let mut shared = self.control.shared.lock();
        if !shared.running {
            return Err(Aborted);
        }
        shared.state = SessionState::Writing;
        Ok(shared.link.take())
    }

    fn finish(&self, kind: OutcomeKind) {
        let mut shared = self.control.shared.lock();
        shared.running = false;
        shared.state = match kind {
            OutcomeKind::Success => SessionState::Succeeded,
            OutcomeKind::Failure => SessionState::Failed,
            OutcomeKind::Aborted => SessionState::Aborted,
        };
        if let Some(link) = shared.link.take() {
            link.close();
        }
    }
}

/// Resolves once the session has been cancelled.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        // The sender lives as long as the session, so this never fires.
        std::future::pending::<()>().await;
    }
}

/// A session running on its own task.
pub struct SessionHandle {
    id: SessionId,
    canceller: SessionCanceller,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.canceller.state()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// Wait for the task to end, including posting its outcome.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            if e.is_panic() {
                error!("Delivery session {} panicked", self.id);
            }
        }
    }

    /// Cancel the session and wait for its task to end.
    pub async fn stop(self) {
        self.cancel();
        self.join().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{DeviceAddress, StubBehavior, StubConnector};
    use crate::delivery::outcome::result_channel;
    use std::time::Duration;

    fn request(retries: u32) -> DeliveryRequest {
        DeliveryRequest::new(
            DeviceAddress::parse("00:11:22:33:44:55").unwrap(),
            "9821",
            retries,
        )
    }

    fn fast_timing() -> DeliveryTiming {
        DeliveryTiming {
            max_retries: 10,
            max_connect_attempts: 5,
            connect_retry_delay_ms: 1,
        }
    }

    fn session(stub: &StubConnector) -> DeliverySession {
        DeliverySession::new(SessionId(1), request(10), fast_timing(), Arc::new(stub.clone()))
    }

    #[tokio::test]
    async fn test_success_writes_code_with_crlf() {
        let stub = StubConnector::accepting();
        let session = session(&stub);
        let canceller = session.canceller();

        assert_eq!(session.run().await, OutcomeKind::Success);
        assert_eq!(stub.attempts(), 1);
        assert_eq!(stub.written().len(), 1);
        assert_eq!(stub.written()[0].1, b"9821\r\n".to_vec());
        assert_eq!(stub.open_links(), 0);
        assert_eq!(canceller.state(), SessionState::Succeeded);
        assert!(!canceller.is_running());
    }

    #[tokio::test]
    async fn test_connect_retries_until_success() {
        let stub = StubConnector::accepting().with_script([
            StubBehavior::Refuse,
            StubBehavior::Refuse,
            StubBehavior::Refuse,
        ]);

        assert_eq!(session(&stub).run().await, OutcomeKind::Success);
        assert_eq!(stub.attempts(), 4);
        assert_eq!(stub.written().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_max_attempts() {
        let stub = StubConnector::new(StubBehavior::Refuse);
        let session = session(&stub);
        let canceller = session.canceller();

        assert_eq!(session.run().await, OutcomeKind::Failure);
        assert_eq!(stub.attempts(), 5);
        assert_eq!(canceller.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_write_failure_is_not_retried() {
        let stub = StubConnector::new(StubBehavior::FailWrite);

        assert_eq!(session(&stub).run().await, OutcomeKind::Failure);
        assert_eq!(stub.attempts(), 1);
        assert_eq!(stub.open_links(), 0);
    }

    #[tokio::test]
    async fn test_cancel_before_run_aborts_without_connecting() {
        let stub = StubConnector::accepting();
        let session = session(&stub);
        session.canceller().cancel();

        assert_eq!(session.run().await, OutcomeKind::Aborted);
        assert_eq!(stub.attempts(), 0);
    }

    #[tokio::test]
    async fn test_cancel_unblocks_hanging_connect() {
        let stub = StubConnector::new(StubBehavior::Hang);
        let (sender, mut receiver) = result_channel();
        let session = session(&stub);
        let handle = session.spawn(sender.for_session(SessionId(1), None));

        while stub.pending_connects() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(handle.state(), SessionState::Connecting);

        handle.stop().await;
        assert_eq!(stub.pending_connects(), 0);

        let posted = receiver.recv().await.unwrap();
        assert_eq!(posted.outcome.kind, OutcomeKind::Aborted);
        assert_eq!(posted.outcome.code, "9821");
        assert_eq!(posted.outcome.retries_remaining, 10);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let stub = StubConnector::new(StubBehavior::Refuse);
        let timing = DeliveryTiming {
            connect_retry_delay_ms: 60_000,
            ..fast_timing()
        };
        let session = DeliverySession::new(SessionId(3), request(2), timing, Arc::new(stub.clone()));
        let (sender, mut receiver) = result_channel();
        let handle = session.spawn(sender.for_session(SessionId(3), None));

        while stub.attempts() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        handle.stop().await;

        let posted = receiver.recv().await.unwrap();
        assert_eq!(posted.outcome.kind, OutcomeKind::Aborted);
        assert_eq!(stub.attempts(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_write_closes_link() {
        let stub = StubConnector::new(StubBehavior::HangWrite);
        let (sender, mut receiver) = result_channel();
        let handle = session(&stub).spawn(sender.for_session(SessionId(1), None));

        while handle.state() != SessionState::Writing {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(stub.open_links(), 1);

        handle.stop().await;

        let posted = receiver.recv().await.unwrap();
        assert_eq!(posted.outcome.kind, OutcomeKind::Aborted);
        assert_eq!(stub.open_links(), 0);
        assert!(stub.written().is_empty());
        assert_eq!(stub.attempts(), 1);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let stub = StubConnector::accepting();
        let session = session(&stub);
        let canceller = session.canceller();
        canceller.cancel();
        canceller.cancel();
        assert!(!canceller.is_running());
        assert_eq!(session.run().await, OutcomeKind::Aborted);
    }

    #[tokio::test]
    async fn test_spawned_session_posts_exactly_once() {
        let stub = StubConnector::accepting();
        let (sender, mut receiver) = result_channel();
        let handle = session(&stub).spawn(sender.for_session(SessionId(1), None));
        handle.join().await;

        let posted = receiver.recv().await.unwrap();
        assert_eq!(posted.outcome.kind, OutcomeKind::Success);
        assert_eq!(posted.outcome.session, SessionId(1));
        assert!(receiver.try_recv().is_none());
    }
}
