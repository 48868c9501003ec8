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

//! The plug-and-play adapter: a single adapter instance that serves one
//! dynamically-arriving controller over a listen socket, with a heartbeat,
//! double-CRLF text framing, and a dynamic device set revealed only after
//! the first successful exchange.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::adapter::buffered::BufferedCore;
use crate::adapter::{Adapter, AdapterKind, RemovalHook};
use crate::devices::manager::DeviceManager;
use crate::devices::signal::{DeviceSignal, SignalValue, SENTINEL_COMMAND};
use crate::devices::table::DeviceTablePair;
use crate::error::{DgiError, Result};

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(5);
const DELIMITER: &[u8] = b"\r\n\r\n";

pub struct PnpAdapter {
    id: String,
    listen_port: u16,
    heartbeat: Duration,
    core: BufferedCore,
    tables: Arc<DeviceTablePair>,
    manager: Arc<DeviceManager>,
    devices: Mutex<HashSet<String>>,
    local_names: Mutex<std::collections::HashMap<String, String>>,
    stopping: Mutex<bool>,
    on_failure: RemovalHook,
    self_weak: Weak<PnpAdapter>,
}

impl PnpAdapter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        listen_port: u16,
        heartbeat: Duration,
        state_len: usize,
        command_len: usize,
        tables: Arc<DeviceTablePair>,
        manager: Arc<DeviceManager>,
        on_failure: RemovalHook,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id,
            listen_port,
            heartbeat,
            core: BufferedCore::new(state_len, command_len),
            tables,
            manager,
            devices: Mutex::new(HashSet::new()),
            local_names: Mutex::new(std::collections::HashMap::new()),
            stopping: Mutex::new(false),
            on_failure,
            self_weak: weak.clone(),
        })
    }

    /// Full device id addressable in the tables: the adapter identifier
    /// with `.` replaced by `:`, joined to the local name with `:`.
    fn full_id(&self, local_name: &str) -> String {
        format!("{}:{}", self.id.replace('.', ":"), local_name)
    }

    fn local_name(&self, full_id: &str) -> String {
        full_id.rsplit_once(':').map(|(_, local)| local.to_string()).unwrap_or(full_id.to_string())
    }

    fn is_stopping(&self) -> bool {
        *self.stopping.lock().unwrap()
    }

    async fn run(self: Arc<Self>) {
        let listener = match TcpListener::bind(("0.0.0.0", self.listen_port)).await {
            Ok(l) => l,
            Err(e) => {
                log::warn!("pnp adapter {}: bind failed: {}", self.id, e);
                (self.on_failure)(&self.id);
                return;
            }
        };
        let (mut stream, _peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("pnp adapter {}: accept failed: {}", self.id, e);
                (self.on_failure)(&self.id);
                return;
            }
        };

        loop {
            if self.is_stopping() {
                return;
            }
            match timeout(self.heartbeat, read_packet(&mut stream)).await {
                Ok(Ok(packet)) => {
                    if self.is_stopping() {
                        return;
                    }
                    match self.handle_packet(&packet).await {
                        Ok(PacketOutcome::Reply(reply)) => {
                            if write_packet(&mut stream, &reply).await.is_err() {
                                (self.on_failure)(&self.id);
                                return;
                            }
                        }
                        Ok(PacketOutcome::Disconnect(reply)) => {
                            let _ = write_packet(&mut stream, &reply).await;
                            (self.on_failure)(&self.id);
                            return;
                        }
                        Err(e) => {
                            log::warn!("pnp adapter {}: {}", self.id, e);
                            (self.on_failure)(&self.id);
                            return;
                        }
                    }
                }
                Ok(Err(e)) => {
                    log::warn!("pnp adapter {}: read failed: {}", self.id, e);
                    (self.on_failure)(&self.id);
                    return;
                }
                Err(_elapsed) => {
                    let _ = timeout(
                        Duration::from_millis(500),
                        write_packet(
                            &mut stream,
                            "Error\r\nConnection closed due to timeout.\r\n\r\n",
                        ),
                    )
                    .await;
                    (self.on_failure)(&self.id);
                    return;
                }
            }
        }
    }

    async fn handle_packet(&self, packet: &str) -> Result<PacketOutcome> {
        let mut lines = packet.split("\r\n");
        let header = lines.next().unwrap_or("");
        match header {
            "DeviceStates" => {
                let body: Vec<&str> = lines.filter(|l| !l.is_empty()).collect();
                match self.apply_device_states(&body) {
                    Ok(()) => Ok(PacketOutcome::Reply(self.build_device_commands())),
                    Err(DgiError::BadRequest(reason)) => {
                        Ok(PacketOutcome::Reply(format!("BadRequest\r\n{reason}\r\n\r\n")))
                    }
                    Err(e) => Err(e),
                }
            }
            "PoliteDisconnect" => {
                Ok(PacketOutcome::Disconnect("PoliteDisconnect\r\nAccepted\r\n\r\n".to_string()))
            }
            other => Ok(PacketOutcome::Reply(format!(
                "BadRequest\r\nUnrecognised header: {other}\r\n\r\n"
            ))),
        }
    }

    fn apply_device_states(&self, lines: &[&str]) -> Result<()> {
        let mut seen = HashSet::new();
        let mut updates = Vec::with_capacity(lines.len());
        for line in lines {
            let mut parts = line.split_whitespace();
            let local_name = parts
                .next()
                .ok_or_else(|| DgiError::BadRequest(format!("malformed line: {line}")))?;
            let signal = parts
                .next()
                .ok_or_else(|| DgiError::BadRequest(format!("malformed line: {line}")))?;
            let raw_value = parts
                .next()
                .ok_or_else(|| DgiError::BadRequest(format!("malformed line: {line}")))?;
            let value: SignalValue = raw_value
                .parse()
                .map_err(|_| DgiError::BadRequest(format!("bad numeric value: {raw_value}")))?;

            let full_device = self.full_id(local_name);
            let key = DeviceSignal::new(full_device.clone(), signal);
            if !seen.insert(key.clone()) {
                return Err(DgiError::BadRequest(format!(
                    "duplicate device signal: {full_device} {signal}"
                )));
            }
            let position = self.core.position_of_state(&key).ok_or_else(|| {
                DgiError::BadRequest(format!("Unknown device signal: {full_device} {signal}"))
            })?;
            updates.push((position, value));
        }

        if seen.len() != self.core.rx_len() {
            return Err(DgiError::BadRequest(format!(
                "DeviceStates covers {} of {} registered state signals",
                seen.len(),
                self.core.rx_len()
            )));
        }

        let mut rx = vec![0.0; self.core.rx_len()];
        for (position, value) in updates {
            rx[position] = value;
        }
        self.core.set_rx(rx);
        self.core.scatter_to_table(&self.tables.state);

        if !self.core.is_initialized() {
            self.core.mark_initialized();
            if let Some(strong) = self.self_weak.upgrade() {
                strong.reveal_devices(&self.manager);
            }
        }
        Ok(())
    }

    fn build_device_commands(&self) -> String {
        self.core.gather_from_table(&self.tables.command);
        let snapshot = self.core.tx_snapshot();
        let names = self.local_names.lock().unwrap();
        let mut body = String::from("DeviceCommands\r\n");
        for (key, position) in self.core.command_entries() {
            let local = names
                .get(&key.device)
                .cloned()
                .unwrap_or_else(|| self.local_name(&key.device));
            let value = snapshot.get(position).copied().unwrap_or(0.0);
            body.push_str(&format!("{} {} {}\r\n", local, key.signal, value));
        }
        body.push_str("\r\n");
        body
    }
}

enum PacketOutcome {
    Reply(String),
    Disconnect(String),
}

async fn read_packet(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "peer closed"));
        }
        buf.push(byte[0]);
        if buf.ends_with(DELIMITER) {
            buf.truncate(buf.len() - DELIMITER.len());
            return Ok(String::from_utf8_lossy(&buf).to_string());
        }
    }
}

async fn write_packet(stream: &mut TcpStream, packet: &str) -> std::io::Result<()> {
    stream.write_all(packet.as_bytes()).await
}

impl Adapter for PnpAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Pnp
    }

    fn start(&self) -> Result<()> {
        let Some(strong) = self.self_weak.upgrade() else {
            return Err(DgiError::Transport("adapter already dropped".into()));
        };
        tokio::spawn(strong.run());
        Ok(())
    }

    fn stop(&self) {
        *self.stopping.lock().unwrap() = true;
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
        // `insert` seeds 0.0, but an un-commanded PNP signal must read back
        // as the sentinel until DGI first writes it (§4.8), unlike RTDS's
        // plain-zero initial command.
        self.tables.command.set(&key, SENTINEL_COMMAND).ok();
        self.core.register_command(key, index)
    }

    fn register_device(&self, id: &str) {
        self.devices.lock().unwrap().insert(id.to_string());
        self.local_names.lock().unwrap().insert(id.to_string(), self.local_name(id));
    }

    fn devices(&self) -> HashSet<String> {
        self.devices.lock().unwrap().clone()
    }
}
