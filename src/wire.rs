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

//! Explicit endian handling for the binary wire protocols. Floats never
//! cross a socket in host order; every conversion goes through
//! `to_be_bytes`/`from_be_bytes` so the layout is independent of the host's
//! own endianness.

use crate::devices::signal::SignalValue;

/// Encodes `values` as big-endian 4-byte floats, one after another.
pub fn encode_be_floats(values: &[SignalValue]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out
}

/// Decodes a buffer of big-endian 4-byte floats. `bytes.len()` must be a
/// multiple of 4; the caller is expected to have read exactly `n * 4`
/// bytes.
pub fn decode_be_floats(bytes: &[u8]) -> Vec<SignalValue> {
    bytes.chunks_exact(4).map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]])).collect()
}

/// Encodes `values` as host-endian 4-byte floats, used by the simulation
/// dialect's `SET`/`GET`/`RST` framing, where both sides run on the same
/// machine and no normalisation is required.
pub fn encode_host_floats(values: &[SignalValue]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_ne_bytes());
    }
    out
}

pub fn decode_host_floats(bytes: &[u8]) -> Vec<SignalValue> {
    bytes.chunks_exact(4).map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_be_encoding_of_one() {
        assert_eq!(encode_be_floats(&[1.0]), vec![0x3F, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn test_be_round_trip() {
        let values = vec![1.0, -0.5, 1.0e8];
        let bytes = encode_be_floats(&values);
        assert_eq!(decode_be_floats(&bytes), values);
    }

    #[test]
    fn test_host_round_trip() {
        let values = vec![3.25, -7.0];
        let bytes = encode_host_floats(&values);
        assert_eq!(decode_host_floats(&bytes), values);
    }
}
