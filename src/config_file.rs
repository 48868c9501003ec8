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

//! Reading the adapter configuration from disk.

use std::path::Path;

use crate::config::AdaptersConfig;
use crate::error::Result;

pub fn from_str(xml: &str) -> Result<AdaptersConfig> {
    crate::config::AdapterSpec::parse(xml)
}

pub fn new_from_file(path: impl AsRef<Path>) -> Result<AdaptersConfig> {
    let contents = std::fs::read_to_string(path)?;
    from_str(&contents)
}
