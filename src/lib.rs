// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The adapter subsystem of a distributed grid-intelligence process: the
//! device-signal key, the process-wide device tables, the device manager's
//! hidden/visible reveal, the adapter contract and its four concrete
//! protocols, and the factory that builds adapters from a specification
//! file.

pub mod adapter;
pub mod args;
pub mod config;
pub mod config_file;
pub mod devices;
pub mod error;
pub mod factory;
pub mod logging;
pub mod wire;
