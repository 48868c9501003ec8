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

//! The process-wide registry of devices, partitioned into `hidden` (newly
//! constructed, not yet observable) and `visible`.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use crate::devices::device::{Device, DeviceIdentifier};
use crate::devices::signal::SignalValue;
use crate::error::{DgiError, Result};

#[derive(Default)]
struct Maps {
    hidden: BTreeMap<DeviceIdentifier, Device>,
    visible: BTreeMap<DeviceIdentifier, Device>,
}

/// Guarded by a single readers/writer lock covering both maps, so that
/// reveal is a single atomic write: a query that observes any device of an
/// adapter observes every device of that adapter.
#[derive(Default)]
pub struct DeviceManager {
    maps: RwLock<Maps>,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `device` into `hidden`. Fails with `DuplicateId` if its
    /// identifier already exists in either map.
    pub fn add(&self, device: Device) -> Result<()> {
        let mut maps = self.maps.write().unwrap();
        let id = device.id().to_string();
        if maps.hidden.contains_key(&id) || maps.visible.contains_key(&id) {
            return Err(DgiError::DuplicateId(id));
        }
        maps.hidden.insert(id, device);
        Ok(())
    }

    /// Moves `id` from `hidden` to `visible`. Fails with `UnknownId` if it
    /// is not currently in `hidden` (including if it is already visible).
    pub fn reveal(&self, id: &str) -> Result<()> {
        let mut maps = self.maps.write().unwrap();
        match maps.hidden.remove(id) {
            Some(device) => {
                maps.visible.insert(id.to_string(), device);
                Ok(())
            }
            None => Err(DgiError::UnknownId(id.to_string())),
        }
    }

    /// Deletes `id` from whichever map contains it. Returns whether a
    /// deletion happened.
    pub fn remove(&self, id: &str) -> bool {
        let mut maps = self.maps.write().unwrap();
        maps.hidden.remove(id).is_some() || maps.visible.remove(id).is_some()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.maps.read().unwrap().visible.contains_key(id)
    }

    /// Unlike `exists`, also considers devices still in `hidden`. Used by
    /// the factory's duplicate-device check at construction time (§4.10
    /// step 2), which must reject a collision with a not-yet-revealed
    /// device, not just a visible one.
    pub fn is_known(&self, id: &str) -> bool {
        let maps = self.maps.read().unwrap();
        maps.hidden.contains_key(id) || maps.visible.contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.maps.read().unwrap().visible.len()
    }

    pub fn get(&self, id: &str) -> Option<Device> {
        self.maps.read().unwrap().visible.get(id).cloned()
    }

    /// Visible devices whose descriptor contains `t`.
    pub fn devices_of_type(&self, t: &str) -> HashSet<DeviceIdentifier> {
        self.maps
            .read()
            .unwrap()
            .visible
            .values()
            .filter(|d| d.has_type(t))
            .map(|d| d.id().to_string())
            .collect()
    }

    /// `get_state(s)` over every visible device of type `t`, as a multiset.
    /// Devices that fail the read (should not happen for a device that
    /// claims the type and state consistently) are skipped.
    pub fn values(&self, t: &str, s: &str) -> Vec<SignalValue> {
        let ids = self.devices_of_type(t);
        let maps = self.maps.read().unwrap();
        ids.iter()
            .filter_map(|id| maps.visible.get(id))
            .filter_map(|d| d.get_state(s).ok())
            .collect()
    }

    /// Sum of `values(t, s)`; 0 over the empty set.
    pub fn net(&self, t: &str, s: &str) -> SignalValue {
        self.values(t, s).iter().sum()
    }
}
