// Copyright 2022, The Android Open Source Project
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

//! The session engine of the Bluetooth LE Ranging Service (RAS).
//!
//! A [ras::RasEngine] registers the service layout against local attribute
//! databases, discovers it on peers, and manages the reference-counted
//! sessions that tie a GATT transport to both. [profile::RangingProfile]
//! binds the engine into a host's profile lifecycle.

pub mod config;
pub mod core;
pub mod gatt;
pub mod profile;
pub mod ras;
pub mod utils;
