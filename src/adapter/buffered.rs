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

//! The shared plumbing behind the buffered adapters (RTDS and plug-and-play):
//! fixed-size receive/transmit vectors and the index maps that translate a
//! device signal into a position in each.
//!
//! This is the adapter's *private* wire-level staging area. It is distinct
//! from the process-wide device table pair: the adapter gathers from the
//! command table into its transmit buffer before a write, and scatters from
//! its receive buffer into the state table after a read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::devices::signal::{DeviceSignal, SignalValue};
use crate::devices::table::DeviceTable;
use crate::error::{DgiError, Result};

/// `state_index`/`command_index` plus the two per-direction buffers they
/// address. Indices are accepted 1-based (per the specification tree) and
/// stored zero-based.
pub struct BufferedCore {
    state_index: RwLock<HashMap<DeviceSignal, usize>>,
    command_index: RwLock<HashMap<DeviceSignal, usize>>,
    rx: RwLock<Vec<SignalValue>>,
    tx: RwLock<Vec<SignalValue>>,
    /// Set once the adapter has exchanged at least one successful
    /// transaction; until then its devices must stay hidden.
    initialized: AtomicBool,
}

impl BufferedCore {
    pub fn new(rx_len: usize, tx_len: usize) -> Self {
        Self {
            state_index: RwLock::new(HashMap::new()),
            command_index: RwLock::new(HashMap::new()),
            rx: RwLock::new(vec![0.0; rx_len]),
            tx: RwLock::new(vec![0.0; tx_len]),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn rx_len(&self) -> usize {
        self.rx.read().unwrap().len()
    }

    pub fn tx_len(&self) -> usize {
        self.tx.read().unwrap().len()
    }

    /// Registers `key` at one-based `index`, converting to the stored
    /// zero-based position. Fails with `BadSpec` if the index is out of
    /// range or already claimed.
    pub fn register_state(&self, key: DeviceSignal, index_one_based: usize) -> Result<()> {
        Self::register(&self.state_index, self.rx_len(), key, index_one_based)
    }

    pub fn register_command(&self, key: DeviceSignal, index_one_based: usize) -> Result<()> {
        Self::register(&self.command_index, self.tx_len(), key, index_one_based)
    }

    fn register(
        map: &RwLock<HashMap<DeviceSignal, usize>>,
        len: usize,
        key: DeviceSignal,
        index_one_based: usize,
    ) -> Result<()> {
        if index_one_based == 0 || index_one_based > len {
            return Err(DgiError::BadSpec(format!(
                "index {index_one_based} out of range for length {len}"
            )));
        }
        let zero_based = index_one_based - 1;
        let mut map = map.write().unwrap();
        if map.values().any(|&i| i == zero_based) {
            return Err(DgiError::BadSpec(format!("index {index_one_based} already in use")));
        }
        map.insert(key, zero_based);
        Ok(())
    }

    /// Locks the receive vector for shared reading. Fails with
    /// `UnknownSignal` if the key is absent.
    pub fn read_state(&self, key: &DeviceSignal) -> Result<SignalValue> {
        let index = *self
            .state_index
            .read()
            .unwrap()
            .get(key)
            .ok_or_else(|| DgiError::UnknownSignal(key.to_string()))?;
        Ok(self.rx.read().unwrap()[index])
    }

    /// Locks the transmit vector exclusively. Fails with `UnknownSignal` if
    /// the key is absent.
    pub fn write_command(&self, key: &DeviceSignal, value: SignalValue) -> Result<()> {
        let index = *self
            .command_index
            .read()
            .unwrap()
            .get(key)
            .ok_or_else(|| DgiError::UnknownSignal(key.to_string()))?;
        self.tx.write().unwrap()[index] = value;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    /// Replaces the whole receive vector, e.g. after decoding a fresh wire
    /// read.
    pub fn set_rx(&self, values: Vec<SignalValue>) {
        *self.rx.write().unwrap() = values;
    }

    /// A snapshot of the transmit vector, e.g. before encoding a wire
    /// write.
    pub fn tx_snapshot(&self) -> Vec<SignalValue> {
        self.tx.read().unwrap().clone()
    }

    /// Copies every `command_index` entry out of the process-wide command
    /// table and into the transmit buffer, by position.
    pub fn gather_from_table(&self, command_table: &DeviceTable) {
        let index = self.command_index.read().unwrap();
        let mut tx = self.tx.write().unwrap();
        for (key, &position) in index.iter() {
            if let Some(value) = command_table.get_opt(key) {
                tx[position] = value;
            }
        }
    }

    /// Copies every received value into the process-wide state table, by
    /// position.
    pub fn scatter_to_table(&self, state_table: &DeviceTable) {
        let index = self.state_index.read().unwrap();
        let rx = self.rx.read().unwrap();
        for (key, &position) in index.iter() {
            let _ = state_table.set(key, rx[position]);
        }
    }

    /// The zero-based position registered for `key` in the state index, if
    /// any.
    pub fn position_of_state(&self, key: &DeviceSignal) -> Option<usize> {
        self.state_index.read().unwrap().get(key).copied()
    }

    /// The zero-based position registered for `key` in the command index,
    /// if any.
    pub fn position_of_command(&self, key: &DeviceSignal) -> Option<usize> {
        self.command_index.read().unwrap().get(key).copied()
    }

    /// A snapshot of every `(device_signal, position)` pair in the state
    /// index.
    pub fn state_entries(&self) -> Vec<(DeviceSignal, usize)> {
        self.state_index.read().unwrap().iter().map(|(k, &i)| (k.clone(), i)).collect()
    }

    /// A snapshot of every `(device_signal, position)` pair in the command
    /// index.
    pub fn command_entries(&self) -> Vec<(DeviceSignal, usize)> {
        self.command_index.read().unwrap().iter().map(|(k, &i)| (k.clone(), i)).collect()
    }

    /// Asserts the invariants of §4.5: both index maps are bijective onto
    /// their buffer's range, and every registered signal is claimed by
    /// exactly one direction (checked by the caller, since that requires
    /// cross-referencing both maps).
    pub fn assert_bijective(&self) -> Result<()> {
        Self::assert_bijective_one(&self.state_index, self.rx_len(), "state")?;
        Self::assert_bijective_one(&self.command_index, self.tx_len(), "command")
    }

    fn assert_bijective_one(
        map: &RwLock<HashMap<DeviceSignal, usize>>,
        len: usize,
        label: &str,
    ) -> Result<()> {
        let map = map.read().unwrap();
        if map.len() != len {
            return Err(DgiError::BadSpec(format!(
                "{label} index covers {} of {} declared positions",
                map.len(),
                len
            )));
        }
        let mut seen = vec![false; len];
        for &position in map.values() {
            if seen[position] {
                return Err(DgiError::BadSpec(format!("{label} index {position} used twice")));
            }
            seen[position] = true;
        }
        Ok(())
    }
}
