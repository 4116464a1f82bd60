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

//! Integration tests for the full relay flow: message in, code out.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

use bluepass::bluetooth::{DeviceAddress, StubBehavior, StubConnector};
use bluepass::config::{SettingsSource, SettingsStore};
use bluepass::delivery::{Command, DeliveryController, DeliveryTiming, OutcomeKind};
use bluepass::events::{EventProcessor, InputEvent};
use bluepass::filter::MatchResult;
use bluepass::state::DeliveryStatus;

const TARGET: &str = "00:11:22:33:44:55";

fn configured_store(dir: &TempDir) -> Arc<SettingsStore> {
    let store = SettingsStore::open(dir.path().join("config.toml")).unwrap();
    store
        .set_filter_patterns(r"^\+1555\d{7}$", r"^CODE:(\d{4})$")
        .unwrap();
    store.set_device(TARGET, Some("Desktop")).unwrap();
    Arc::new(store)
}

fn fast_timing() -> DeliveryTiming {
    DeliveryTiming {
        max_retries: 10,
        max_connect_attempts: 5,
        connect_retry_delay_ms: 1,
    }
}

async fn next_terminal(rx: &mut mpsc::UnboundedReceiver<DeliveryStatus>) -> Vec<DeliveryStatus> {
    let mut seen = Vec::new();
    while let Some(status) = rx.recv().await {
        let terminal = status.is_terminal();
        seen.push(status);
        if terminal {
            break;
        }
    }
    seen
}

#[test]
fn test_filter_extracts_code() {
    let dir = TempDir::new().unwrap();
    let store = configured_store(&dir);

    assert_eq!(
        store.filter_rule().check("+15551234567", "CODE:9821"),
        MatchResult::Matched("9821".into())
    );
}

#[tokio::test]
async fn test_message_is_delivered_after_failed_sessions() {
    let dir = TempDir::new().unwrap();
    let store = configured_store(&dir);

    // Two whole sessions fail to connect, the third connects on its first try.
    let stub = StubConnector::accepting().with_script(vec![StubBehavior::Refuse; 10]);
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let controller = DeliveryController::new(Arc::new(stub.clone()), store.clone(), Arc::new(status_tx))
        .with_timing(fast_timing());

    let (command_tx, command_rx) = mpsc::channel(8);
    let controller_task = tokio::spawn(controller.run(command_rx));

    let mut processor = EventProcessor::new(store, command_tx.clone());
    processor
        .process_event(InputEvent::Sms {
            sender: "+15551234567".into(),
            body: "CODE:9821".into(),
        })
        .await
        .unwrap();

    let reports = next_terminal(&mut status_rx).await;
    assert_eq!(
        reports,
        vec![
            DeliveryStatus::Pending("9821".into()),
            DeliveryStatus::FailedRetrying {
                code: "9821".into(),
                attempt: 1,
                max: 10
            },
            DeliveryStatus::FailedRetrying {
                code: "9821".into(),
                attempt: 2,
                max: 10
            },
            DeliveryStatus::Success("9821".into()),
        ]
    );
    assert_eq!(stub.attempts(), 11);
    assert_eq!(
        stub.written(),
        vec![(DeviceAddress::parse(TARGET).unwrap(), b"9821\r\n".to_vec())]
    );

    command_tx.send(Command::Shutdown).await.unwrap();
    controller_task.await.unwrap();
    assert_eq!(stub.open_links(), 0);
}

#[tokio::test]
async fn test_budget_exhaustion_reports_final_failure() {
    let dir = TempDir::new().unwrap();
    let store = configured_store(&dir);

    let stub = StubConnector::new(StubBehavior::Refuse);
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let timing = DeliveryTiming {
        max_retries: 3,
        ..fast_timing()
    };
    let mut controller =
        DeliveryController::new(Arc::new(stub.clone()), store, Arc::new(status_tx)).with_timing(timing);
    let mut outcomes = controller.take_outcomes().unwrap();

    controller.start("9821").await;

    let mut budgets = Vec::new();
    while let Some(posted) = outcomes.recv().await {
        assert_eq!(posted.outcome.kind, OutcomeKind::Failure);
        budgets.push(posted.outcome.retries_remaining);
        controller.on_outcome(posted).await;
        if controller.active_session().is_none() {
            break;
        }
    }

    assert_eq!(budgets, vec![3, 2, 1, 0]);
    assert_eq!(stub.attempts(), 4 * 5);
    assert!(stub.written().is_empty());
    assert!(!controller.wake_lock().is_held());

    let reports = next_terminal(&mut status_rx).await;
    assert_eq!(reports.first(), Some(&DeliveryStatus::Pending("9821".into())));
    assert_eq!(
        reports.last(),
        Some(&DeliveryStatus::FailedFinal("9821".into()))
    );
    assert_eq!(reports.len(), 1 + 3 + 1);
}

#[tokio::test]
async fn test_new_code_supersedes_running_delivery() {
    let dir = TempDir::new().unwrap();
    let store = configured_store(&dir);

    let stub = StubConnector::accepting().with_script([StubBehavior::Hang]);
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let controller = DeliveryController::new(Arc::new(stub.clone()), store, Arc::new(status_tx))
        .with_timing(fast_timing());

    let (command_tx, command_rx) = mpsc::channel(8);
    let controller_task = tokio::spawn(controller.run(command_rx));

    command_tx.send(Command::PushCode("1111".into())).await.unwrap();
    while stub.pending_connects() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    command_tx.send(Command::PushCode("2222".into())).await.unwrap();

    let mut reports = next_terminal(&mut status_rx).await;
    reports.retain(|status| !matches!(status, DeliveryStatus::Pending(_)));
    assert_eq!(reports, vec![DeliveryStatus::Success("2222".into())]);
    assert_eq!(stub.max_pending_connects(), 1);
    assert_eq!(stub.written().len(), 1);
    assert_eq!(stub.written()[0].1, b"2222\r\n".to_vec());

    command_tx.send(Command::Shutdown).await.unwrap();
    controller_task.await.unwrap();
}

#[tokio::test]
async fn test_unconfigured_device_is_reported() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SettingsStore::open(dir.path().join("config.toml")).unwrap());

    let stub = StubConnector::accepting();
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let mut controller = DeliveryController::new(Arc::new(stub.clone()), store, Arc::new(status_tx));

    controller.start("9821").await;

    assert_eq!(
        next_terminal(&mut status_rx).await,
        vec![
            DeliveryStatus::Pending("9821".into()),
            DeliveryStatus::NotConfigured
        ]
    );
    assert_eq!(stub.attempts(), 0);
}
