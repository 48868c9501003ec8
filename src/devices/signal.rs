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

//! The key and value types that address one point in a device table.

use std::fmt;

/// The value carried by a device signal: always a 32-bit float.
pub type SignalValue = f32;

/// Reserved value meaning "no command known". Adapters must treat reception
/// of this value as "leave unchanged" rather than a real set-point.
pub const SENTINEL_COMMAND: SignalValue = 1.0e8;

/// Returns true if `value` is exactly the sentinel "unknown command" value.
pub fn is_sentinel(value: SignalValue) -> bool {
    value == SENTINEL_COMMAND
}

/// A `(device_id, signal_name)` pair. Ordered lexicographically, device
/// first, so it can key a `BTreeMap` and iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceSignal {
    pub device: String,
    pub signal: String,
}

impl DeviceSignal {
    pub fn new(device: impl Into<String>, signal: impl Into<String>) -> Self {
        Self { device: device.into(), signal: signal.into() }
    }
}

impl fmt::Display for DeviceSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.device, self.signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_device_first() {
        let a = DeviceSignal::new("gen1", "Z");
        let b = DeviceSignal::new("gen2", "A");
        assert!(a < b);
    }

    #[test]
    fn test_sentinel_equality_is_exact() {
        assert!(is_sentinel(SENTINEL_COMMAND));
        assert!(!is_sentinel(SENTINEL_COMMAND - 1.0));
        assert!(!is_sentinel(0.0));
    }

    #[test]
    fn test_display() {
        let sig = DeviceSignal::new("sst1", "gateway");
        assert_eq!(sig.to_string(), "sst1 gateway");
    }
}
