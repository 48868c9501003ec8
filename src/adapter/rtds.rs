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

//! The TCP binary adapter: a fixed-cadence send/receive cycle against a
//! big-endian peer, typically an RTDS-driven FPGA.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;

use crate::adapter::buffered::BufferedCore;
use crate::adapter::{Adapter, AdapterKind, RemovalHook};
use crate::devices::manager::DeviceManager;
use crate::devices::signal::{DeviceSignal, SignalValue};
use crate::devices::table::DeviceTablePair;
use crate::error::{DgiError, Result};
use crate::wire;

pub const DEFAULT_CYCLE_PERIOD: Duration = Duration::from_millis(1);

const DISCONNECTED: u8 = 0;
const CONNECTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPED: u8 = 3;

pub struct RtdsAdapter {
    id: String,
    host: String,
    port: u16,
    cycle_period: Duration,
    core: BufferedCore,
    tables: Arc<DeviceTablePair>,
    manager: Arc<DeviceManager>,
    devices: Mutex<HashSet<String>>,
    lifecycle: AtomicU8,
    stop_notify: Notify,
    on_failure: RemovalHook,
    self_weak: Weak<RtdsAdapter>,
}

impl RtdsAdapter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        host: String,
        port: u16,
        rx_len: usize,
        tx_len: usize,
        cycle_period: Duration,
        tables: Arc<DeviceTablePair>,
        manager: Arc<DeviceManager>,
        on_failure: RemovalHook,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id,
            host,
            port,
            cycle_period,
            core: BufferedCore::new(rx_len, tx_len),
            tables,
            manager,
            devices: Mutex::new(HashSet::new()),
            lifecycle: AtomicU8::new(DISCONNECTED),
            stop_notify: Notify::new(),
            on_failure,
            self_weak: weak.clone(),
        })
    }

    pub fn core(&self) -> &BufferedCore {
        &self.core
    }

    async fn connect(&self) -> Result<TcpStream> {
        let addr = format!("{}:{}", self.host, self.port);
        let resolved: Vec<_> = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| DgiError::ConnectFailed(e.to_string()))?
            .collect();
        if resolved.is_empty() {
            return Err(DgiError::ConnectFailed(format!("no addresses for {addr}")));
        }
        for candidate in &resolved {
            if let Ok(stream) = TcpStream::connect(candidate).await {
                return Ok(stream);
            }
        }
        Err(DgiError::ConnectFailed(format!("no endpoint for {addr} accepted a connection")))
    }

    async fn run(self: Arc<Self>) {
        self.lifecycle.store(CONNECTING, Ordering::SeqCst);
        let mut stream = match self.connect().await {
            Ok(s) => s,
            Err(e) => {
                log::warn!("rtds adapter {}: {}", self.id, e);
                self.lifecycle.store(STOPPED, Ordering::SeqCst);
                (self.on_failure)(&self.id);
                return;
            }
        };
        self.lifecycle.store(RUNNING, Ordering::SeqCst);

        let mut ticker = tokio::time::interval(self.cycle_period);
        loop {
            tokio::select! {
                _ = self.stop_notify.notified() => {
                    self.lifecycle.store(STOPPED, Ordering::SeqCst);
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.cycle(&mut stream).await {
                        log::warn!("rtds adapter {}: {}", self.id, e);
                        self.lifecycle.store(STOPPED, Ordering::SeqCst);
                        (self.on_failure)(&self.id);
                        return;
                    }
                }
            }
        }
    }

    async fn cycle(&self, stream: &mut TcpStream) -> Result<()> {
        self.core.gather_from_table(&self.tables.command);
        let tx_bytes = wire::encode_be_floats(&self.core.tx_snapshot());
        stream.write_all(&tx_bytes).await?;

        let mut rx_bytes = vec![0u8; self.core.rx_len() * 4];
        stream.read_exact(&mut rx_bytes).await?;
        self.core.set_rx(wire::decode_be_floats(&rx_bytes));
        self.core.scatter_to_table(&self.tables.state);

        if !self.core.is_initialized() {
            self.core.mark_initialized();
            if let Some(strong) = self.self_weak.upgrade() {
                strong.reveal_devices(&self.manager);
            }
        }
        Ok(())
    }
}

impl Adapter for RtdsAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Rtds
    }

    fn start(&self) -> Result<()> {
        let Some(strong) = self.self_weak.upgrade() else {
            return Err(DgiError::Transport("adapter already dropped".into()));
        };
        tokio::spawn(strong.run());
        Ok(())
    }

    fn stop(&self) {
        if self.lifecycle.swap(STOPPED, Ordering::SeqCst) != STOPPED {
            self.stop_notify.notify_one();
        }
    }

    fn get_state(&self, device: &str, signal: &str) -> Result<SignalValue> {
        self.tables.state.get(&DeviceSignal::new(device, signal))
    }

    fn set_command(&self, device: &str, signal: &str, value: SignalValue) -> Result<()> {
        self.tables.command.set(&DeviceSignal::new(device, signal), value)
    }

    fn register_state_index(&self, device: &str, signal: &str, index: usize) -> Result<()> {
        let key = DeviceSignal::new(device, signal);
        self.tables.state.insert(key.clone());
        self.core.register_state(key, index)
    }

    fn register_command_index(&self, device: &str, signal: &str, index: usize) -> Result<()> {
        let key = DeviceSignal::new(device, signal);
        self.tables.command.insert(key.clone());
        self.core.register_command(key, index)
    }

    fn register_device(&self, id: &str) {
        self.devices.lock().unwrap().insert(id.to_string());
    }

    fn devices(&self) -> HashSet<String> {
        self.devices.lock().unwrap().clone()
    }

    fn assert_bijective(&self) -> Result<()> {
        self.core.assert_bijective()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> Arc<RtdsAdapter> {
        RtdsAdapter::new(
            "rtds1".into(),
            "127.0.0.1".into(),
            0,
            1,
            1,
            DEFAULT_CYCLE_PERIOD,
            Arc::new(DeviceTablePair::new()),
            Arc::new(DeviceManager::new()),
            Arc::new(|_id: &str| {}),
        )
    }

    #[test]
    fn test_register_seeds_tables_and_index() {
        let a = adapter();
        a.register_state_index("gen1", "V", 1).unwrap();
        a.register_command_index("gen1", "Q", 1).unwrap();
        assert_eq!(a.get_state("gen1", "V").unwrap(), 0.0);
        a.set_command("gen1", "Q", 0.5).unwrap();
        assert_eq!(a.tables.command.get(&DeviceSignal::new("gen1", "Q")).unwrap(), 0.5);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let a = adapter();
        a.stop();
        a.stop();
        assert_eq!(a.lifecycle.load(Ordering::SeqCst), STOPPED);
    }

    #[tokio::test]
    async fn test_connect_failed_on_unroutable_host() {
        let a = adapter();
        let result = a.connect().await;
        assert!(matches!(result, Err(DgiError::ConnectFailed(_))));
    }
}
