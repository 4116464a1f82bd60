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

//! Configuration module.
//!
//! Handles loading and saving application settings, and serves snapshots
//! of them to the delivery pipeline.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bluetooth::{AddressError, DeviceAddress};
use crate::delivery::DeliveryTiming;
use crate::filter::{self, FilterRule};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Pattern '{0}' does not compile")]
    InvalidPattern(String),

    #[error(transparent)]
    InvalidAddress(#[from] AddressError),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Message filter settings.
    pub filter: FilterConfig,

    /// Target device settings.
    pub device: DeviceConfig,

    /// Retry budget and connect pacing.
    pub delivery: DeliveryTiming,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Pattern the whole sender must match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_pattern: Option<String>,

    /// Pattern the whole body must match. Group 1 is the code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_pattern: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Address of the device codes are sent to, `AA:BB:CC:DD:EE:FF`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Display name of the device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// RFCOMM channel to dial instead of looking up the service record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
}

/// The device codes are delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDevice {
    pub address: DeviceAddress,
    pub name: Option<String>,
}

impl Config {
    /// `<config dir>/bluepass/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bluepass")
            .join("config.toml")
    }

    /// Load configuration from the default path, creating it if missing.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path` or create a default file there.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
        } else {
            info!("Creating default configuration at {}", path.display());
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(io_error)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_error)?;
        Ok(())
    }

    pub fn filter_rule(&self) -> FilterRule {
        FilterRule::from_patterns(
            self.filter.sender_pattern.as_deref(),
            self.filter.content_pattern.as_deref(),
        )
    }

    /// The configured device, if its address is set and well-formed.
    pub fn target_device(&self) -> Option<TargetDevice> {
        let text = self.device.address.as_deref()?;
        match DeviceAddress::parse(text) {
            Ok(address) => Some(TargetDevice {
                address,
                name: self.device.name.clone().filter(|name| !name.is_empty()),
            }),
            Err(e) => {
                warn!("Ignoring configured device: {}", e);
                None
            }
        }
    }
}

/// Read access to the settings the pipeline needs.
///
/// Every call returns a fresh snapshot, so changes are picked up by the
/// next operation.
pub trait SettingsSource: Send + Sync {
    fn filter_rule(&self) -> FilterRule;
    fn target_device(&self) -> Option<TargetDevice>;
}

struct Snapshot {
    config: Config,
    rule: FilterRule,
}

impl Snapshot {
    fn new(config: Config) -> Self {
        let rule = config.filter_rule();
        Self { config, rule }
    }
}

/// File-backed settings shared between the CLI and the controller.
pub struct SettingsStore {
    path: PathBuf,
    inner: RwLock<Snapshot>,
}

impl SettingsStore {
    /// Open the configuration at `path`, creating a default one if missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = Config::load_from(&path)?;
        debug!("Configuration loaded from {}", path.display());
        Ok(Self {
            path,
            inner: RwLock::new(Snapshot::new(config)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> Config {
        self.inner.read().config.clone()
    }

    pub fn timing(&self) -> DeliveryTiming {
        self.inner.read().config.delivery
    }

    /// Forced RFCOMM channel, if any.
    pub fn channel(&self) -> Option<u8> {
        self.inner.read().config.device.channel
    }

    /// Re-read the file, keeping the current settings if that fails.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let config = Config::load_from(&self.path)?;
        *self.inner.write() = Snapshot::new(config);
        info!("Configuration reloaded from {}", self.path.display());
        Ok(())
    }

    /// Store both filter patterns.
    ///
    /// A pattern that does not compile is not stored; the other one still is.
    pub fn set_filter_patterns(&self, sender: &str, content: &str) -> Result<(), ConfigError> {
        let mut rejected = None;
        let mut config = self.config();

        for (pattern, slot) in [
            (sender, &mut config.filter.sender_pattern),
            (content, &mut config.filter.content_pattern),
        ] {
            if filter::compile(pattern).is_some() {
                *slot = Some(pattern.to_string());
            } else if rejected.is_none() {
                rejected = Some(pattern.to_string());
            }
        }

        self.commit(config)?;
        match rejected {
            Some(pattern) => Err(ConfigError::InvalidPattern(pattern)),
            None => Ok(()),
        }
    }

    /// Store the target device. An invalid address changes nothing.
    pub fn set_device(&self, address: &str, name: Option<&str>) -> Result<(), ConfigError> {
        let address = DeviceAddress::parse(address)?;

        let mut config = self.config();
        config.device.address = Some(address.to_string());
        config.device.name = Some(name.unwrap_or_default().to_string());
        self.commit(config)?;

        info!("Target device set to {}", address);
        Ok(())
    }

    fn commit(&self, config: Config) -> Result<(), ConfigError> {
        let mut inner = self.inner.write();
        config.save_to(&self.path)?;
        *inner = Snapshot::new(config);
        Ok(())
    }
}

impl SettingsSource for SettingsStore {
    fn filter_rule(&self) -> FilterRule {
        self.inner.read().rule.clone()
    }

    fn target_device(&self) -> Option<TargetDevice> {
        self.inner.read().config.target_device()
    }
}
