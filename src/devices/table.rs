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

//! The two process-wide, lock-protected maps that every adapter and every
//! DGI module reads and writes through: `STATE` (sensed, adapter → DGI) and
//! `COMMAND` (actuation, DGI → adapter).

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::devices::signal::{DeviceSignal, SignalValue};
use crate::error::{DgiError, Result};

/// One of the two shared tables. `STATE` and `COMMAND` are each an instance
/// of this type; they never share a lock.
#[derive(Default)]
pub struct DeviceTable {
    entries: RwLock<BTreeMap<DeviceSignal, SignalValue>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent creation of `key` with value 0. Re-inserting an existing
    /// key leaves its value untouched.
    pub fn insert(&self, key: DeviceSignal) {
        let mut entries = self.entries.write().unwrap();
        entries.entry(key).or_insert(0.0);
    }

    pub fn exists(&self, key: &DeviceSignal) -> bool {
        self.entries.read().unwrap().contains_key(key)
    }

    pub fn get(&self, key: &DeviceSignal) -> Result<SignalValue> {
        self.entries
            .read()
            .unwrap()
            .get(key)
            .copied()
            .ok_or_else(|| DgiError::UnknownSignal(key.to_string()))
    }

    /// Returns the value for `key`, or `None` if absent, without failing.
    /// Used by `reset` to avoid double error-handling across the two
    /// disjoint critical sections.
    pub fn get_opt(&self, key: &DeviceSignal) -> Option<SignalValue> {
        self.entries.read().unwrap().get(key).copied()
    }

    pub fn set(&self, key: &DeviceSignal, value: SignalValue) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        match entries.get_mut(key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(DgiError::UnknownSignal(key.to_string())),
        }
    }

    /// A snapshot of every key currently present, for callers (`reset`)
    /// that need to iterate without holding the lock across other work.
    fn keys_snapshot(&self) -> Vec<(DeviceSignal, SignalValue)> {
        self.entries.read().unwrap().iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

/// `reset(target, source)`: for every key present in both tables, copies the
/// source value into target. Acquires a shared read on `source`, releases
/// it, then acquires an exclusive write on `target`; the two locks are
/// never held at the same time.
pub fn reset(target: &DeviceTable, source: &DeviceTable) {
    let snapshot = source.keys_snapshot();
    let mut entries = target.entries.write().unwrap();
    for (key, value) in snapshot {
        if let Some(slot) = entries.get_mut(&key) {
            *slot = value;
        }
    }
}

/// The pair of tables shared by the whole process: `state` (sensed) and
/// `command` (actuation).
#[derive(Default)]
pub struct DeviceTablePair {
    pub state: DeviceTable,
    pub command: DeviceTable,
}

impl DeviceTablePair {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(d: &str, s: &str) -> DeviceSignal {
        DeviceSignal::new(d, s)
    }

    #[test]
    fn test_insert_is_idempotent_and_seeds_zero() {
        let t = DeviceTable::new();
        t.insert(sig("gen1", "V"));
        assert_eq!(t.get(&sig("gen1", "V")).unwrap(), 0.0);
        t.set(&sig("gen1", "V"), 5.0).unwrap();
        t.insert(sig("gen1", "V"));
        assert_eq!(t.get(&sig("gen1", "V")).unwrap(), 5.0);
    }

    #[test]
    fn test_get_set_unknown_signal() {
        let t = DeviceTable::new();
        assert!(matches!(t.get(&sig("x", "y")), Err(DgiError::UnknownSignal(_))));
        assert!(matches!(t.set(&sig("x", "y"), 1.0), Err(DgiError::UnknownSignal(_))));
    }

    #[test]
    fn test_reset_copies_only_shared_keys() {
        let source = DeviceTable::new();
        let target = DeviceTable::new();
        source.insert(sig("gen1", "V"));
        source.insert(sig("gen1", "Q"));
        target.insert(sig("gen1", "V"));
        target.insert(sig("gen1", "untouched"));
        source.set(&sig("gen1", "V"), 1.5).unwrap();
        source.set(&sig("gen1", "Q"), 9.0).unwrap();
        target.set(&sig("gen1", "untouched"), 42.0).unwrap();

        reset(&target, &source);

        assert_eq!(target.get(&sig("gen1", "V")).unwrap(), 1.5);
        assert_eq!(target.get(&sig("gen1", "untouched")).unwrap(), 42.0);
        assert!(!target.exists(&sig("gen1", "Q")));
    }
}
