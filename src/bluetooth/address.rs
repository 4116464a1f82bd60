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

//! Bluetooth device addresses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned for malformed device addresses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid Bluetooth address: '{0}'. Expected format 'AA:BB:CC:DD:EE:FF' (upper-case hex).")]
pub struct AddressError(pub String);

/// A format-checked Bluetooth device address (`AA:BB:CC:DD:EE:FF`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    /// Length of the textual form.
    pub const TEXT_LEN: usize = 17;

    /// Parse an address. Hex digits must be upper-case, octets separated by `:`.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let invalid = || AddressError(s.to_string());

        if s.len() != Self::TEXT_LEN {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        for (i, part) in s.split(':').enumerate() {
            if i >= octets.len() || part.len() != 2 {
                return Err(invalid());
            }
            if !part
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
            {
                return Err(invalid());
            }
            octets[i] = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        Ok(Self(octets))
    }

    /// Whether `s` is a well-formed address.
    pub fn is_valid(s: &str) -> bool {
        Self::parse(s).is_ok()
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<[u8; 6]> for DeviceAddress {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl From<DeviceAddress> for String {
    fn from(value: DeviceAddress) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let addr = DeviceAddress::parse("00:1A:7D:DA:71:13").unwrap();
        assert_eq!(addr.octets(), [0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]);
        assert_eq!(addr.to_string(), "00:1A:7D:DA:71:13");
    }

    #[test]
    fn test_parse_invalid() {
        for bad in [
            "",
            "00:1A:7D:DA:71",
            "00:1A:7D:DA:71:13:00",
            "00-1A-7D-DA-71-13",
            "00:1a:7d:da:71:13",
            "00:1A:7D:DA:71:1G",
            "001A:7D:DA:71:13:",
            " 00:1A:7D:DA:71:1",
        ] {
            assert!(DeviceAddress::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_error_message() {
        let err = DeviceAddress::parse("nope").unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_serde_roundtrip_validates() {
        let addr: DeviceAddress = serde_json::from_str("\"AA:BB:CC:DD:EE:FF\"").unwrap();
        assert_eq!(serde_json::to_string(&addr).unwrap(), "\"AA:BB:CC:DD:EE:FF\"");
        assert!(serde_json::from_str::<DeviceAddress>("\"aa:bb\"").is_err());
    }
}
