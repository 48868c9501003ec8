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

//! The crate-wide error type shared by the device model, the adapters, and
//! the factory.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DgiError {
    /// Configuration is malformed or inconsistent. Fatal at adapter
    /// construction time.
    #[error("bad spec: {0}")]
    BadSpec(String),

    /// A device identifier collided with one already known to the device
    /// manager.
    #[error("duplicate device: {0}")]
    DuplicateDevice(String),

    /// An adapter identifier collided with one already known to the
    /// factory.
    #[error("duplicate adapter id: {0}")]
    DuplicateId(String),

    /// A device identifier lookup missed.
    #[error("unknown device id: {0}")]
    UnknownId(String),

    /// A device-signal lookup missed.
    #[error("unknown signal: {0}")]
    UnknownSignal(String),

    /// A PSCAD peer returned a non-200 status.
    #[error("{code} {message}")]
    ProtocolError { code: u16, message: String },

    /// A PNP peer sent a packet that could not be accepted.
    #[error("{0}")]
    BadRequest(String),

    /// A socket or timer failed; the owning adapter is being torn down.
    #[error("transport error: {0}")]
    Transport(String),

    /// A PNP heartbeat expired.
    #[error("heartbeat timeout")]
    Timeout,

    /// No resolved endpoint accepted a connection.
    #[error("connect failed: {0}")]
    ConnectFailed(String),
}

impl From<std::io::Error> for DgiError {
    fn from(e: std::io::Error) -> Self {
        DgiError::Transport(e.to_string())
    }
}

impl From<quick_xml::de::DeError> for DgiError {
    fn from(e: quick_xml::de::DeError) -> Self {
        DgiError::BadSpec(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DgiError>;
