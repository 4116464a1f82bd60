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

//! BluePass relays one-time codes from incoming text messages to a paired
//! Bluetooth device.
//!
//! Messages are checked against a [`filter::FilterRule`]; a match yields a
//! code which the [`delivery::DeliveryController`] writes to the configured
//! device over RFCOMM, retrying failed sessions up to a fixed budget.

pub mod bluetooth;
pub mod config;
pub mod delivery;
pub mod events;
pub mod filter;
pub mod power;
pub mod state;
