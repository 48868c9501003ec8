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

//! Process-wide logger setup. Every adapter, the device manager, and the
//! factory log through the `log` macros rather than printing directly.

use std::io::Write;

use chrono::Local;
use env_logger::Env;

/// Initialises the global logger. `verbosity` raises the default level:
/// 0 = info, 1 = debug, 2+ = trace. `to_stderr` is accepted for symmetry
/// with the CLI flag; `env_logger` already writes to stderr by default.
pub fn init(verbosity: u8, to_stderr: bool) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let _ = to_stderr;
    let env = Env::default().default_filter_or(default_level);
    env_logger::Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}:{} {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .try_init()
        .ok();
}
