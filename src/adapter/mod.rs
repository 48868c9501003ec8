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

//! The uniform surface every adapter variant offers, and the tagged
//! dispatch key the factory uses to tell them apart.

pub mod buffered;
pub mod pnp;
pub mod pscad;
pub mod rtds;

use std::collections::HashSet;
use std::sync::Arc;

use crate::devices::manager::DeviceManager;
use crate::devices::signal::SignalValue;
use crate::error::Result;

/// A non-owning callback an adapter uses to ask the factory to remove it
/// once it has failed irrecoverably. The factory is the only strong owner
/// of an adapter (per the redesign note on shared ownership); this hook is
/// built from a `Weak` reference to the factory, so a callback firing after
/// the factory itself is gone is simply a no-op.
pub type RemovalHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Which of the four concrete protocols an adapter speaks. Used by the
/// factory's dispatch table and by log messages; not consulted for
/// behaviour once an adapter is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Buffered,
    Rtds,
    Pscad,
    Pnp,
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AdapterKind::Buffered => "buffered",
            AdapterKind::Rtds => "rtds",
            AdapterKind::Pscad => "pscad",
            AdapterKind::Pnp => "pnp",
        };
        f.write_str(s)
    }
}

/// Common contract for every adapter variant. An adapter owns one external
/// transport and mediates between it and the device tables.
pub trait Adapter: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> AdapterKind;

    /// Launches the adapter's transport work. Safe to call exactly once
    /// per adapter; later calls are a logic error in the caller, not
    /// something this contract guards against.
    fn start(&self) -> Result<()>;

    /// Idempotent and thread-safe: stopping an already-stopped adapter is a
    /// no-op.
    fn stop(&self);

    fn get_state(&self, device: &str, signal: &str) -> Result<SignalValue>;

    fn set_command(&self, device: &str, signal: &str, value: SignalValue) -> Result<()>;

    fn register_state_index(&self, device: &str, signal: &str, index: usize) -> Result<()>;

    fn register_command_index(&self, device: &str, signal: &str, index: usize) -> Result<()>;

    fn register_device(&self, id: &str);

    fn devices(&self) -> HashSet<String>;

    /// Checked once by the factory after every signal in an adapter's
    /// specification has been registered. The default is a no-op; the
    /// buffered-core variants override it to confirm every buffer slot
    /// was claimed exactly once.
    fn assert_bijective(&self) -> Result<()> {
        Ok(())
    }

    /// Calls `device_manager.reveal` for every device this adapter owns.
    fn reveal_devices(&self, manager: &DeviceManager) {
        for id in self.devices() {
            if let Err(e) = manager.reveal(&id) {
                log::warn!("adapter {}: reveal of {} failed: {}", self.id(), id, e);
            }
        }
    }
}
