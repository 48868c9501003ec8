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

//! The XML-like adapter specification tree: one `<adapter>` element per
//! instance, each with a `state` and a `command` subtree of entries.

use serde::Deserialize;

use crate::devices::signal::SignalValue;
use crate::error::{DgiError, Result};

#[derive(Debug, Deserialize)]
pub struct AdaptersConfig {
    #[serde(rename = "adapter", default)]
    pub adapters: Vec<AdapterSpec>,
}

#[derive(Debug, Deserialize)]
pub struct AdapterSpec {
    #[serde(rename = "@type")]
    pub adapter_type: String,
    #[serde(rename = "@identifier")]
    pub identifier: String,
    #[serde(rename = "@host")]
    pub host: Option<String>,
    #[serde(rename = "@port")]
    pub port: Option<u16>,
    #[serde(rename = "@listenport")]
    pub listenport: Option<u16>,
    pub state: Option<EntryList>,
    pub command: Option<EntryList>,
}

#[derive(Debug, Deserialize, Default)]
pub struct EntryList {
    #[serde(rename = "entry", default)]
    pub entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    #[serde(rename = "@index")]
    pub index: usize,
    #[serde(rename = "@device")]
    pub device: String,
    #[serde(rename = "@signal")]
    pub signal: String,
    #[serde(rename = "@value")]
    pub value: Option<SignalValue>,
    /// Comma-separated type tags for this device, e.g. `"Generator,Drer"`.
    /// Not part of the wire protocol; used only to populate
    /// `Descriptor::types` so `device_manager.values`/`net` have something
    /// to group by.
    #[serde(rename = "@type")]
    pub types: Option<String>,
}

impl AdapterSpec {
    pub fn parse(xml: &str) -> Result<AdaptersConfig> {
        quick_xml::de::from_str(xml).map_err(DgiError::from)
    }

    /// Validates the one global requirement §4.9's "Specification loading"
    /// also applies to core adapter specs: declared indices must jointly
    /// form `{1,…,N}` within each subtree, with no empty device/signal and
    /// no repeated `(device, signal)` pair.
    pub fn validate(&self) -> Result<()> {
        if self.identifier.is_empty() {
            return Err(DgiError::BadSpec("adapter identifier must not be empty".into()));
        }
        Self::validate_entries(self.state.as_ref())?;
        Self::validate_entries(self.command.as_ref())
    }

    fn validate_entries(list: Option<&EntryList>) -> Result<()> {
        let Some(list) = list else { return Ok(()) };
        let n = list.entries.len();
        let mut seen_index = vec![false; n + 1];
        let mut seen_pair = std::collections::HashSet::new();
        for entry in &list.entries {
            if entry.device.is_empty() || entry.signal.is_empty() {
                return Err(DgiError::BadSpec("device and signal must not be empty".into()));
            }
            if entry.index == 0 || entry.index > n {
                return Err(DgiError::BadSpec(format!(
                    "index {} out of range for {n} declared entries",
                    entry.index
                )));
            }
            if seen_index[entry.index] {
                return Err(DgiError::BadSpec(format!("index {} repeated", entry.index)));
            }
            seen_index[entry.index] = true;
            if !seen_pair.insert((entry.device.clone(), entry.signal.clone())) {
                return Err(DgiError::BadSpec(format!(
                    "device signal repeated: {} {}",
                    entry.device, entry.signal
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <adapters>
          <adapter type="rtds" identifier="rtds1" host="127.0.0.1" port="7000">
            <state><entry index="1" device="gen1" signal="V" type="Generator"/></state>
            <command><entry index="1" device="gen1" signal="Q"/></command>
          </adapter>
          <adapter type="pnp" identifier="mamba3" listenport="9000">
            <state><entry index="1" device="sst" signal="gateway"/></state>
            <command><entry index="1" device="sst" signal="gateway"/></command>
          </adapter>
        </adapters>
    "#;

    #[test]
    fn test_parses_two_adapters() {
        let config = AdapterSpec::parse(SAMPLE).unwrap();
        assert_eq!(config.adapters.len(), 2);
        assert_eq!(config.adapters[0].adapter_type, "rtds");
        assert_eq!(config.adapters[1].listenport, Some(9000));
    }

    #[test]
    fn test_validate_rejects_out_of_range_index() {
        let xml = r#"<adapters><adapter type="rtds" identifier="r1">
            <state><entry index="2" device="gen1" signal="V"/></state>
        </adapter></adapters>"#;
        let config = AdapterSpec::parse(xml).unwrap();
        assert!(config.adapters[0].validate().is_err());
    }

    #[test]
    fn test_validate_rejects_repeated_pair() {
        let xml = r#"<adapters><adapter type="rtds" identifier="r1">
            <state>
              <entry index="1" device="gen1" signal="V"/>
              <entry index="2" device="gen1" signal="V"/>
            </state>
        </adapter></adapters>"#;
        let config = AdapterSpec::parse(xml).unwrap();
        assert!(config.adapters[0].validate().is_err());
    }
}
