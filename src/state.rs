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

//! Delivery status reports and the application state they feed.

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Status reported to the notification surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// A code was accepted and is about to be sent.
    Pending(String),
    /// The code was written to the device.
    Success(String),
    /// Sending failed; another attempt follows.
    FailedRetrying {
        code: String,
        attempt: u32,
        max: u32,
    },
    /// Sending failed and no retries are left.
    FailedFinal(String),
    /// No usable target device is configured.
    NotConfigured,
}

impl DeliveryStatus {
    /// Notification title for this status.
    pub fn title(&self) -> String {
        match self {
            Self::Pending(code) => format!("Sending code {code}..."),
            Self::Success(code) => format!("Code {code} sent"),
            Self::FailedRetrying { code, attempt, max } => {
                format!("Failed to send code {code}, retrying ({attempt}/{max})")
            }
            Self::FailedFinal(code) => format!("Failed to send code {code}"),
            Self::NotConfigured => "No Bluetooth device configured".to_string(),
        }
    }

    /// Whether no further report follows for this code.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success(_) | Self::FailedFinal(_) | Self::NotConfigured
        )
    }
}

/// Receives status reports. Implementations must not block.
pub trait StatusSink: Send + Sync {
    fn report(&self, status: DeliveryStatus);
}

impl StatusSink for mpsc::UnboundedSender<DeliveryStatus> {
    fn report(&self, status: DeliveryStatus) {
        // A closed receiver means nobody is watching any more.
        let _ = self.send(status);
    }
}

/// Latest status for display.
#[derive(Debug)]
pub struct RelayState {
    /// Most recent report.
    pub status: RwLock<Option<DeliveryStatus>>,

    /// When the most recent report arrived.
    pub updated_at: RwLock<Option<DateTime<Local>>>,

    /// Reports received since start.
    pub report_count: RwLock<u64>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self {
            status: RwLock::new(None),
            updated_at: RwLock::new(None),
            report_count: RwLock::new(0),
        }
    }
}

impl RelayState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get_status(&self) -> Option<DeliveryStatus> {
        self.status.read().clone()
    }

    pub fn get_updated_at(&self) -> Option<DateTime<Local>> {
        *self.updated_at.read()
    }

    pub fn get_report_count(&self) -> u64 {
        *self.report_count.read()
    }
}

impl StatusSink for RelayState {
    fn report(&self, status: DeliveryStatus) {
        *self.status.write() = Some(status);
        *self.updated_at.write() = Some(Local::now());
        *self.report_count.write() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_titles() {
        assert_eq!(DeliveryStatus::Pending("1234".into()).title(), "Sending code 1234...");
        assert_eq!(
            DeliveryStatus::FailedRetrying {
                code: "1234".into(),
                attempt: 3,
                max: 10
            }
            .title(),
            "Failed to send code 1234, retrying (3/10)"
        );
    }

    #[test]
    fn test_terminal() {
        assert!(DeliveryStatus::Success("1".into()).is_terminal());
        assert!(DeliveryStatus::FailedFinal("1".into()).is_terminal());
        assert!(DeliveryStatus::NotConfigured.is_terminal());
        assert!(!DeliveryStatus::Pending("1".into()).is_terminal());
        assert!(!DeliveryStatus::FailedRetrying {
            code: "1".into(),
            attempt: 1,
            max: 10
        }
        .is_terminal());
    }

    #[test]
    fn test_relay_state_records_reports() {
        let state = RelayState::new();
        assert!(state.get_status().is_none());

        state.report(DeliveryStatus::Pending("42".into()));
        state.report(DeliveryStatus::Success("42".into()));

        assert_eq!(state.get_status(), Some(DeliveryStatus::Success("42".into())));
        assert_eq!(state.get_report_count(), 2);
        assert!(state.get_updated_at().is_some());
    }

    #[test]
    fn test_channel_sink_ignores_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        tx.report(DeliveryStatus::NotConfigured);
    }
}
