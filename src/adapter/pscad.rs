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

//! The line-text adapter: a synchronous client of a CRLF-framed request/
//! response protocol, typically a PSCAD simulation server.
//!
//! Unlike the buffered adapters, every read and write is a single
//! synchronous round trip issued on whichever thread calls `get_state` or
//! `set_command`; there is no background pump.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::adapter::{Adapter, AdapterKind};
use crate::devices::signal::{DeviceSignal, SignalValue};
use crate::devices::table::DeviceTablePair;
use crate::error::{DgiError, Result};

struct Connection {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

pub struct PscadAdapter {
    id: String,
    host: String,
    port: u16,
    tables: Arc<DeviceTablePair>,
    devices: Mutex<HashSet<String>>,
    connection: Mutex<Option<Connection>>,
    open: AtomicBool,
}

impl PscadAdapter {
    pub fn new(id: String, host: String, port: u16, tables: Arc<DeviceTablePair>) -> Arc<Self> {
        Arc::new(Self {
            id,
            host,
            port,
            tables,
            devices: Mutex::new(HashSet::new()),
            connection: Mutex::new(None),
            open: AtomicBool::new(false),
        })
    }

    fn request(&self, line: &str) -> Result<String> {
        let mut guard = self.connection.lock().unwrap();
        let conn = guard
            .as_mut()
            .ok_or_else(|| DgiError::Transport(format!("adapter {} not connected", self.id)))?;
        conn.writer.write_all(line.as_bytes())?;
        conn.writer.write_all(b"\r\n")?;
        conn.writer.flush()?;

        let mut response = String::new();
        conn.reader.read_line(&mut response)?;
        if response.is_empty() {
            self.open.store(false, Ordering::SeqCst);
            return Err(DgiError::Transport(format!("adapter {} peer closed connection", self.id)));
        }
        Ok(response.trim_end_matches(['\r', '\n']).to_string())
    }

    fn parse_status(response: &str) -> Result<(u16, String)> {
        let mut parts = response.splitn(2, ' ');
        let code: u16 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| DgiError::Transport(format!("malformed response: {response}")))?;
        let rest = parts.next().unwrap_or("").to_string();
        Ok((code, rest))
    }
}

impl Adapter for PscadAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Pscad
    }

    fn start(&self) -> Result<()> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .map_err(|e| DgiError::ConnectFailed(e.to_string()))?;
        let reader_half =
            stream.try_clone().map_err(|e| DgiError::ConnectFailed(e.to_string()))?;
        *self.connection.lock().unwrap() =
            Some(Connection { writer: stream, reader: BufReader::new(reader_half) });
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.request("QUIT") {
                log::debug!("adapter {}: best-effort quit failed: {}", self.id, e);
            }
        }
        *self.connection.lock().unwrap() = None;
    }

    fn get_state(&self, device: &str, signal: &str) -> Result<SignalValue> {
        let response = self.request(&format!("GET {device} {signal}"))?;
        let (code, rest) = Self::parse_status(&response)?;
        if code != 200 {
            return Err(DgiError::ProtocolError { code, message: rest });
        }
        let value: SignalValue = rest
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| DgiError::Transport(format!("malformed GET reply: {response}")))?;
        let _ = self.tables.state.set(&DeviceSignal::new(device, signal), value);
        Ok(value)
    }

    fn set_command(&self, device: &str, signal: &str, value: SignalValue) -> Result<()> {
        let response = self.request(&format!("SET {device} {signal} {value}"))?;
        let (code, rest) = Self::parse_status(&response)?;
        if code != 200 {
            return Err(DgiError::ProtocolError { code, message: rest });
        }
        self.tables.command.set(&DeviceSignal::new(device, signal), value)
    }

    fn register_state_index(&self, device: &str, signal: &str, _index: usize) -> Result<()> {
        self.tables.state.insert(DeviceSignal::new(device, signal));
        Ok(())
    }

    fn register_command_index(&self, device: &str, signal: &str, _index: usize) -> Result<()> {
        self.tables.command.insert(DeviceSignal::new(device, signal));
        Ok(())
    }

    fn register_device(&self, id: &str) {
        self.devices.lock().unwrap().insert(id.to_string());
    }

    fn devices(&self) -> HashSet<String> {
        self.devices.lock().unwrap().clone()
    }
}

impl Drop for PscadAdapter {
    fn drop(&mut self) {
        if self.open.load(Ordering::SeqCst) {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_ok_with_value() {
        let (code, rest) = PscadAdapter::parse_status("200 OK 2.5").unwrap();
        assert_eq!(code, 200);
        assert_eq!(rest, "OK 2.5");
    }

    #[test]
    fn test_parse_status_not_found() {
        let (code, rest) = PscadAdapter::parse_status("404 ERROR NOTFOUND").unwrap();
        assert_eq!(code, 404);
        assert_eq!(rest, "ERROR NOTFOUND");
    }

    #[test]
    fn test_request_without_connection_fails() {
        let a = PscadAdapter::new(
            "pscad1".into(),
            "127.0.0.1".into(),
            0,
            Arc::new(DeviceTablePair::new()),
        );
        assert!(matches!(a.get_state("sst1", "gateway"), Err(DgiError::Transport(_))));
    }
}
