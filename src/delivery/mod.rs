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

//! Code delivery pipeline.
//!
//! A [`DeliveryController`] owns the retry policy and at most one running
//! [`DeliverySession`]. Each session connects to the target device, writes
//! the code once and posts its [`DeliveryOutcome`] back to the controller
//! through the result channel.

mod controller;
mod outcome;
mod session;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::bluetooth::DeviceAddress;

pub use controller::{Command, DeliveryController};
pub use outcome::{
    result_channel, DeliveryOutcome, OutcomeKind, OutcomeReceiver, OutcomeSender, PostedOutcome,
    ResultSender, RESULT_CHANNEL_CAPACITY,
};
pub use session::{DeliverySession, SessionCanceller, SessionHandle, SessionState};

/// Session retries the controller makes after a failed session.
pub const MAX_RETRIES: u32 = 10;

/// Connect attempts within one session.
pub const MAX_CONNECT_RETRIES: u32 = 5;

/// Pause between connect attempts, in milliseconds.
pub const CONNECT_TIMEOUT_MS: u64 = 1000;

/// Identifies one session for the lifetime of its controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One attempt to deliver a code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    pub address: DeviceAddress,
    pub code: String,
    pub retries_remaining: u32,
}

impl DeliveryRequest {
    pub fn new(address: DeviceAddress, code: impl Into<String>, retries_remaining: u32) -> Self {
        Self {
            address,
            code: code.into(),
            retries_remaining,
        }
    }

    /// Bytes written to the device: the code followed by CRLF.
    pub fn payload(&self) -> Vec<u8> {
        format!("{}\r\n", self.code).into_bytes()
    }
}

/// Retry budget and pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryTiming {
    /// Session retries after the first session fails.
    pub max_retries: u32,

    /// Connect attempts per session.
    pub max_connect_attempts: u32,

    /// Pause between connect attempts, in milliseconds.
    pub connect_retry_delay_ms: u64,
}

impl Default for DeliveryTiming {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            max_connect_attempts: MAX_CONNECT_RETRIES,
            connect_retry_delay_ms: CONNECT_TIMEOUT_MS,
        }
    }
}

impl DeliveryTiming {
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }
}
