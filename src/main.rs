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

//! Entry point for the adapter daemon: parses CLI args, loads the adapter
//! specification file, builds every adapter it declares, and runs until
//! interrupted.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

use dgi_adapterd::args::DgiAdapterdArgs;
use dgi_adapterd::devices::manager::DeviceManager;
use dgi_adapterd::devices::table::DeviceTablePair;
use dgi_adapterd::factory::AdapterFactory;
use dgi_adapterd::{config_file, logging};

#[tokio::main]
async fn main() -> ExitCode {
    let args = DgiAdapterdArgs::parse();
    logging::init(args.verbose, args.log_to_stderr);

    let config = match config_file::new_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load adapter spec {}: {}", args.config, e);
            return ExitCode::FAILURE;
        }
    };

    let tables = Arc::new(DeviceTablePair::new());
    let manager = Arc::new(DeviceManager::new());
    let factory = AdapterFactory::new(tables, manager.clone());

    let mut failures = 0usize;
    for spec in &config.adapters {
        match factory.create_adapter(spec) {
            Ok(adapter) => info!(
                "started {} adapter {} with {} device(s)",
                adapter.kind(),
                adapter.id(),
                adapter.devices().len()
            ),
            Err(e) => {
                failures += 1;
                error!("failed to start adapter {}: {}", spec.identifier, e);
            }
        }
    }
    if factory.is_empty() {
        warn!("no adapters started from {}", args.config);
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to wait for ctrl-c: {}", e);
    }
    info!("shutting down, {} visible device(s)", manager.count());

    if failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
