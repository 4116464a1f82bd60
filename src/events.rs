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

//! Inbound event processing and dispatch.
//!
//! Events arrive as one JSON object per line, for example
//! `{"type":"sms","sender":"+15551234567","body":"CODE:9821"}`. Messages are
//! run through the configured filter; everything else maps onto a
//! controller [`Command`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::bluetooth::DeviceAddress;
use crate::config::{SettingsSource, SettingsStore};
use crate::delivery::Command;
use crate::filter::MatchResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    /// A text message arrived.
    Sms { sender: String, body: String },
    /// Deliver a code directly, bypassing the filter.
    Push { code: String },
    Stop,
    Retry,
    Copy,
    /// Connect to a device once to start pairing.
    Probe { address: String },
    /// Re-read the configuration file.
    Reload,
    Shutdown,
}

impl InputEvent {
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).with_context(|| format!("Malformed event: {line}"))
    }
}

/// Turns inbound events into controller commands.
pub struct EventProcessor {
    settings: Arc<SettingsStore>,
    commands: mpsc::Sender<Command>,
    last_copied: Option<String>,
}

impl EventProcessor {
    pub fn new(settings: Arc<SettingsStore>, commands: mpsc::Sender<Command>) -> Self {
        Self {
            settings,
            commands,
            last_copied: None,
        }
    }

    /// The code returned by the most recent `copy` event.
    pub fn last_copied(&self) -> Option<&str> {
        self.last_copied.as_deref()
    }

    /// Process a single event. Returns `false` after a shutdown.
    pub async fn process_event(&mut self, event: InputEvent) -> Result<bool> {
        match event {
            InputEvent::Sms { sender, body } => {
                self.handle_message(&sender, &body).await?;
            }
            InputEvent::Push { code } => {
                self.send(Command::PushCode(code)).await?;
            }
            InputEvent::Stop => {
                self.send(Command::Stop).await?;
            }
            InputEvent::Retry => {
                self.send(Command::RetrySend).await?;
            }
            InputEvent::Copy => {
                self.handle_copy().await?;
            }
            InputEvent::Probe { address } => match DeviceAddress::parse(&address) {
                Ok(address) => self.send(Command::ProbePairing(address)).await?,
                Err(e) => warn!("{}", e),
            },
            InputEvent::Reload => {
                if let Err(e) = self.settings.reload() {
                    error!("Failed to reload configuration: {}", e);
                }
            }
            InputEvent::Shutdown => {
                self.send(Command::Shutdown).await?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Parse and process one line. Malformed lines are logged and skipped.
    pub async fn process_line(&mut self, line: &str) -> Result<bool> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(true);
        }

        match InputEvent::parse(line) {
            Ok(event) => self.process_event(event).await,
            Err(e) => {
                warn!("{:#}", e);
                Ok(true)
            }
        }
    }

    /// Read events until end of input or a shutdown event.
    pub async fn run<R: AsyncBufRead + Unpin>(mut self, reader: R) -> Result<()> {
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            if !self.process_line(&line).await? {
                return Ok(());
            }
        }

        info!("Input closed");
        Ok(())
    }

    async fn handle_message(&self, sender: &str, body: &str) -> Result<()> {
        info!("Received message from '{}'", sender);

        match self.settings.filter_rule().check(sender, body) {
            MatchResult::Matched(code) => {
                info!("Extracted code '{}'", code);
                self.send(Command::PushCode(code)).await
            }
            other => {
                debug!("Message dropped: {}", other.describe());
                Ok(())
            }
        }
    }

    async fn handle_copy(&mut self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::CopyLastCode(reply_tx)).await?;

        match reply_rx.await.context("Delivery controller dropped the reply")? {
            Some(code) => {
                println!("{code}");
                self.last_copied = Some(code);
            }
            None => info!("Skip copy, no code received so far"),
        }
        Ok(())
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .context("Delivery controller is not running")
    }
}
