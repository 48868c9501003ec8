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

//! A typed view over a subset of keys in the device table pair.

use std::collections::HashSet;
use std::sync::Arc;

use crate::adapter::Adapter;
use crate::devices::signal::{DeviceSignal, SignalValue, SENTINEL_COMMAND};
use crate::devices::table::DeviceTablePair;
use crate::error::{DgiError, Result};

pub type DeviceIdentifier = String;

/// What a device claims to be and to support: a set of types, a set of
/// state signals it can be read on, and a set of command signals it can be
/// written on.
#[derive(Debug, Clone, Default)]
pub struct Descriptor {
    pub types: HashSet<String>,
    pub states: HashSet<String>,
    pub commands: HashSet<String>,
}

/// A device carries no mutex of its own; all synchronisation is inherited
/// from the device table pair and from the adapter that backs it. Cheap to
/// clone: every field is itself a `String`/`Arc`.
#[derive(Clone)]
pub struct Device {
    id: DeviceIdentifier,
    descriptor: Descriptor,
    adapter: Arc<dyn Adapter>,
    tables: Arc<DeviceTablePair>,
}

impl Device {
    pub fn new(
        id: DeviceIdentifier,
        descriptor: Descriptor,
        adapter: Arc<dyn Adapter>,
        tables: Arc<DeviceTablePair>,
    ) -> Self {
        Self { id, descriptor, adapter, tables }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn has_type(&self, t: &str) -> bool {
        self.descriptor.types.contains(t)
    }

    pub fn has_state(&self, s: &str) -> bool {
        self.descriptor.states.contains(s)
    }

    pub fn has_command(&self, s: &str) -> bool {
        self.descriptor.commands.contains(s)
    }

    /// Fails with `UnknownSignal` if this device does not claim `s` as a
    /// state; otherwise returns the adapter's current reading for it.
    pub fn get_state(&self, s: &str) -> Result<SignalValue> {
        if !self.has_state(s) {
            return Err(DgiError::UnknownSignal(format!("{} {}", self.id, s)));
        }
        self.adapter.get_state(&self.id, s)
    }

    /// Fails if this device does not claim `s` as a command and `override`
    /// is false; otherwise reads the command table directly, returning the
    /// sentinel if the key is not present there.
    pub fn get_command(&self, s: &str, r#override: bool) -> Result<SignalValue> {
        if !self.has_command(s) && !r#override {
            return Err(DgiError::UnknownSignal(format!("{} {}", self.id, s)));
        }
        let key = DeviceSignal::new(self.id.clone(), s);
        Ok(self.tables.command.get_opt(&key).unwrap_or(SENTINEL_COMMAND))
    }

    /// Fails with `UnknownSignal` if this device does not claim `s` as a
    /// command; otherwise hands the write to the adapter.
    pub fn set_command(&self, s: &str, v: SignalValue) -> Result<()> {
        if !self.has_command(s) {
            return Err(DgiError::UnknownSignal(format!("{} {}", self.id, s)));
        }
        self.adapter.set_command(&self.id, s, v)
    }

    /// Writes the sentinel into `COMMAND` for every command signal this
    /// device claims.
    pub fn clear_commands(&self) {
        for s in &self.descriptor.commands {
            let key = DeviceSignal::new(self.id.clone(), s.clone());
            let _ = self.tables.command.set(&key, SENTINEL_COMMAND);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterKind;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A trivial adapter stub for exercising `Device`'s own logic in
    /// isolation from any real transport.
    struct StubAdapter {
        state: Mutex<HashMap<(String, String), SignalValue>>,
    }

    impl Adapter for StubAdapter {
        fn id(&self) -> &str {
            "stub"
        }
        fn kind(&self) -> AdapterKind {
            AdapterKind::Buffered
        }
        fn start(&self) -> Result<()> {
            Ok(())
        }
        fn stop(&self) {}
        fn get_state(&self, device: &str, signal: &str) -> Result<SignalValue> {
            self.state
                .lock()
                .unwrap()
                .get(&(device.to_string(), signal.to_string()))
                .copied()
                .ok_or_else(|| DgiError::UnknownSignal(format!("{device} {signal}")))
        }
        fn set_command(&self, _device: &str, _signal: &str, _value: SignalValue) -> Result<()> {
            Ok(())
        }
        fn register_state_index(&self, _device: &str, _signal: &str, _index: usize) -> Result<()> {
            Ok(())
        }
        fn register_command_index(
            &self,
            _device: &str,
            _signal: &str,
            _index: usize,
        ) -> Result<()> {
            Ok(())
        }
        fn register_device(&self, _id: &str) {}
        fn devices(&self) -> HashSet<String> {
            HashSet::new()
        }
        fn reveal_devices(&self, _manager: &crate::devices::manager::DeviceManager) {}
    }

    fn make_device() -> (Device, Arc<DeviceTablePair>) {
        let tables = Arc::new(DeviceTablePair::new());
        tables.command.insert(DeviceSignal::new("gen1", "Q"));
        let mut state = HashMap::new();
        state.insert(("gen1".to_string(), "V".to_string()), 1.5);
        let adapter = Arc::new(StubAdapter { state: Mutex::new(state) });
        let descriptor = Descriptor {
            types: HashSet::from(["Generator".to_string()]),
            states: HashSet::from(["V".to_string()]),
            commands: HashSet::from(["Q".to_string()]),
        };
        (Device::new("gen1".to_string(), descriptor, adapter, tables.clone()), tables)
    }

    #[test]
    fn test_get_state_rejects_unclaimed_signal() {
        let (device, _) = make_device();
        assert!(matches!(device.get_state("unclaimed"), Err(DgiError::UnknownSignal(_))));
        assert_eq!(device.get_state("V").unwrap(), 1.5);
    }

    #[test]
    fn test_get_command_returns_sentinel_when_absent_and_overridden() {
        let (device, _) = make_device();
        assert!(matches!(device.get_command("unclaimed", false), Err(DgiError::UnknownSignal(_))));
        assert_eq!(device.get_command("unclaimed", true).unwrap(), SENTINEL_COMMAND);
        assert_eq!(device.get_command("Q", false).unwrap(), 0.0);
    }

    #[test]
    fn test_clear_commands_resets_to_sentinel() {
        let (device, tables) = make_device();
        tables.command.set(&DeviceSignal::new("gen1", "Q"), 3.0).unwrap();
        assert_eq!(device.get_command("Q", false).unwrap(), 3.0);
        device.clear_commands();
        assert_eq!(device.get_command("Q", false).unwrap(), SENTINEL_COMMAND);
    }
}
