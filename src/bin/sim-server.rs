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

//! The simulation-side counterpart of the RTDS, PSCAD and plug-and-play
//! adapters: a demo process that owns the authoritative state/command
//! tables and services one of three wire dialects per listening port,
//! selected from a configuration file at startup.
//!
//! Grounded on `original_source/PSCAD-Interface` (`CTableManager`,
//! `CAdapterRtds`, `CAdapterPscad`, `CAdapterSimulation`): this binary
//! exists so the adapter subsystem can be exercised end-to-end without a
//! real FPGA or PSCAD peer. It reuses the core library's
//! `DeviceTable`/`DeviceTablePair` and the `wire` module's endian helpers
//! rather than duplicating the framing logic.

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use log::{debug, error, info, warn};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use dgi_adapterd::config::EntryList;
use dgi_adapterd::devices::signal::{DeviceSignal, SignalValue};
use dgi_adapterd::devices::table::{self, DeviceTable, DeviceTablePair};
use dgi_adapterd::error::{DgiError, Result};
use dgi_adapterd::{logging, wire};

#[derive(Debug, Parser)]
struct SimServerArgs {
    /// Path to the listener specification XML file
    #[arg(short, long)]
    config: String,

    /// Set whether log messages go to stderr instead of logfiles
    #[arg(short = 's', long)]
    log_to_stderr: bool,

    /// Increase log verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Deserialize)]
struct ListenersConfig {
    #[serde(rename = "listener", default)]
    listeners: Vec<ListenerSpec>,
}

#[derive(Debug, Deserialize)]
struct ListenerSpec {
    #[serde(rename = "@type")]
    listener_type: String,
    #[serde(rename = "@port")]
    port: u16,
    state: Option<EntryList>,
    command: Option<EntryList>,
}

/// A listener's declared table size translated into a position-ordered
/// vector of device signals: `signals[i]` is the key that occupies wire
/// position `i`, mirroring the original's `m_StateDetails`/
/// `m_CommandDetails` vectors.
fn ordered_signals(list: &Option<EntryList>) -> Result<Vec<DeviceSignal>> {
    let Some(list) = list else { return Ok(Vec::new()) };
    let n = list.entries.len();
    let mut slots: Vec<Option<DeviceSignal>> = vec![None; n];
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
        if slots[entry.index - 1].is_some() {
            return Err(DgiError::BadSpec(format!("index {} repeated", entry.index)));
        }
        if !seen_pair.insert((entry.device.clone(), entry.signal.clone())) {
            return Err(DgiError::BadSpec(format!(
                "device signal repeated: {} {}",
                entry.device, entry.signal
            )));
        }
        slots[entry.index - 1] = Some(DeviceSignal::new(entry.device.clone(), entry.signal.clone()));
    }
    Ok(slots.into_iter().map(|s| s.expect("every index 1..=n is used exactly once")).collect())
}

/// Installs every entry of `list` into `table`, seeding declared initial
/// values. Fails with `BadSpec` if the same device signal is given two
/// different nonzero initial values by entries processed so far (across
/// every listener, since the table is shared process-wide).
fn install_initial_values(
    list: &Option<EntryList>,
    table: &DeviceTable,
    seen_values: &mut HashMap<DeviceSignal, SignalValue>,
) -> Result<()> {
    let Some(list) = list else { return Ok(()) };
    for entry in &list.entries {
        let key = DeviceSignal::new(entry.device.clone(), entry.signal.clone());
        table.insert(key.clone());
        let Some(value) = entry.value else { continue };
        match seen_values.get(&key) {
            Some(&existing) if existing != 0.0 && existing != value => {
                return Err(DgiError::BadSpec(format!(
                    "initial value for {key} repeated with conflicting values"
                )));
            }
            _ => {
                seen_values.insert(key.clone(), value);
                table.set(&key, value)?;
            }
        }
    }
    Ok(())
}

fn validate_ports_unique(listeners: &[ListenerSpec]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for listener in listeners {
        if !seen.insert(listener.port) {
            return Err(DgiError::BadSpec(format!("duplicate listener port {}", listener.port)));
        }
    }
    Ok(())
}

struct Listener {
    listener_type: String,
    port: u16,
    state_signals: Vec<DeviceSignal>,
    command_signals: Vec<DeviceSignal>,
}

fn load_listeners(xml: &str, tables: &DeviceTablePair) -> Result<Vec<Listener>> {
    let config: ListenersConfig = quick_xml::de::from_str(xml)?;
    validate_ports_unique(&config.listeners)?;

    let mut state_values = HashMap::new();
    let mut command_values = HashMap::new();
    let mut out = Vec::with_capacity(config.listeners.len());
    for spec in &config.listeners {
        let state_signals = ordered_signals(&spec.state)?;
        let command_signals = ordered_signals(&spec.command)?;
        install_initial_values(&spec.state, &tables.state, &mut state_values)?;
        install_initial_values(&spec.command, &tables.command, &mut command_values)?;
        out.push(Listener {
            listener_type: spec.listener_type.clone(),
            port: spec.port,
            state_signals,
            command_signals,
        });
    }
    Ok(out)
}

/// `original_source/PSCAD-Interface/src/CAdapterRtds.cpp`: accept one
/// connection and loop forever, reading the command table from the peer
/// and writing the state table back, both big-endian. Ends on the first
/// transport error.
async fn run_rtds(port: u16, state: Vec<DeviceSignal>, command: Vec<DeviceSignal>, tables: Arc<DeviceTablePair>) {
    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(l) => l,
        Err(e) => {
            error!("rtds listener on port {port}: bind failed: {e}");
            return;
        }
    };
    let (mut stream, peer) = match listener.accept().await {
        Ok(pair) => pair,
        Err(e) => {
            error!("rtds listener on port {port}: accept failed: {e}");
            return;
        }
    };
    info!("rtds listener on port {port}: accepted {peer}");

    loop {
        let mut rx_bytes = vec![0u8; command.len() * 4];
        if let Err(e) = stream.read_exact(&mut rx_bytes).await {
            info!("rtds listener on port {port}: client disconnected: {e}");
            return;
        }
        let values = wire::decode_be_floats(&rx_bytes);
        for (key, value) in command.iter().zip(values) {
            if let Err(e) = tables.command.set(key, value) {
                warn!("rtds listener on port {port}: {e}");
            }
        }

        let mut tx_values = Vec::with_capacity(state.len());
        for key in &state {
            tx_values.push(tables.state.get(key).unwrap_or(0.0));
        }
        let tx_bytes = wire::encode_be_floats(&tx_values);
        if let Err(e) = stream.write_all(&tx_bytes).await {
            info!("rtds listener on port {port}: client disconnected: {e}");
            return;
        }
    }
}

/// `original_source/PSCAD-Interface/src/CAdapterPscad.cpp`: a CRLF-framed
/// request/response loop, serving one client connection at a time until
/// it issues `QUIT` or disconnects, then accepting the next.
async fn run_pscad(port: u16, tables: Arc<DeviceTablePair>) {
    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(l) => l,
        Err(e) => {
            error!("pscad listener on port {port}: bind failed: {e}");
            return;
        }
    };
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!("pscad listener on port {port}: accept failed: {e}");
                return;
            }
        };
        info!("pscad listener on port {port}: accepted {peer}");
        let tables = tables.clone();
        tokio::spawn(async move {
            if let Err(e) = pscad_session(stream, &tables).await {
                debug!("pscad listener: session ended: {e}");
            }
        });
    }
}

async fn pscad_session(stream: TcpStream, tables: &DeviceTablePair) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(());
        }
        let request = line.trim_end_matches(['\r', '\n']);
        let mut parts = request.split_whitespace();
        let response = match parts.next() {
            Some("SET") => {
                let (device, signal, raw_value) =
                    match (parts.next(), parts.next(), parts.next()) {
                        (Some(d), Some(s), Some(v)) => (d, s, v),
                        _ => {
                            write_half.write_all(b"400 BADREQUEST\r\n").await?;
                            continue;
                        }
                    };
                let Ok(value): std::result::Result<SignalValue, _> = raw_value.parse() else {
                    write_half.write_all(b"400 BADREQUEST\r\n").await?;
                    continue;
                };
                match tables.command.set(&DeviceSignal::new(device, signal), value) {
                    Ok(()) => "200 OK\r\n".to_string(),
                    Err(_) => "404 ERROR NOTFOUND\r\n".to_string(),
                }
            }
            Some("GET") => {
                let (device, signal) = match (parts.next(), parts.next()) {
                    (Some(d), Some(s)) => (d, s),
                    _ => {
                        write_half.write_all(b"400 BADREQUEST\r\n").await?;
                        continue;
                    }
                };
                match tables.state.get(&DeviceSignal::new(device, signal)) {
                    Ok(value) => format!("200 OK {value}\r\n"),
                    Err(_) => "404 ERROR NOTFOUND\r\n".to_string(),
                }
            }
            Some("QUIT") => {
                write_half.write_all(b"200 OK\r\n").await?;
                return Ok(());
            }
            _ => "400 BADREQUEST\r\n".to_string(),
        };
        write_half.write_all(response.as_bytes()).await?;
    }
}

/// `original_source/PSCAD-Interface/src/CSimulationAdapter.cpp`: a fixed
/// 3-byte header (`SET`/`GET`/`RST`) followed by a host-endian float
/// payload sized by the listener's declared table. `RST` additionally
/// synchronises the command table from the freshly written state table.
async fn run_simulation(
    port: u16,
    state: Vec<DeviceSignal>,
    command: Vec<DeviceSignal>,
    tables: Arc<DeviceTablePair>,
) {
    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(l) => l,
        Err(e) => {
            error!("simulation listener on port {port}: bind failed: {e}");
            return;
        }
    };
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!("simulation listener on port {port}: accept failed: {e}");
                return;
            }
        };
        info!("simulation listener on port {port}: accepted {peer}");
        let (state, command, tables) = (state.clone(), command.clone(), tables.clone());
        tokio::spawn(async move {
            if let Err(e) = simulation_session(stream, &state, &command, &tables).await {
                debug!("simulation listener: session ended: {e}");
            }
        });
    }
}

async fn simulation_session(
    mut stream: TcpStream,
    state: &[DeviceSignal],
    command: &[DeviceSignal],
    tables: &DeviceTablePair,
) -> Result<()> {
    loop {
        let mut header = [0u8; 3];
        stream.read_exact(&mut header).await?;
        match &header {
            b"SET" => {
                set_state(&mut stream, state, tables).await?;
            }
            b"GET" => {
                get_command(&mut stream, command, tables).await?;
            }
            b"RST" => {
                set_state(&mut stream, state, tables).await?;
                table::reset(&tables.command, &tables.state);
            }
            other => {
                warn!("simulation listener: unrecognised header {:?}", other);
            }
        }
    }
}

async fn set_state(stream: &mut TcpStream, state: &[DeviceSignal], tables: &DeviceTablePair) -> Result<()> {
    let mut payload = vec![0u8; state.len() * 4];
    stream.read_exact(&mut payload).await?;
    let values = wire::decode_host_floats(&payload);
    for (key, value) in state.iter().zip(values) {
        let _ = tables.state.set(key, value);
    }
    Ok(())
}

async fn get_command(stream: &mut TcpStream, command: &[DeviceSignal], tables: &DeviceTablePair) -> Result<()> {
    let mut values = Vec::with_capacity(command.len());
    for key in command {
        values.push(tables.command.get_opt(key).unwrap_or(0.0));
    }
    stream.write_all(&wire::encode_host_floats(&values)).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = SimServerArgs::parse();
    logging::init(args.verbose, args.log_to_stderr);

    let xml = match std::fs::read_to_string(&args.config) {
        Ok(xml) => xml,
        Err(e) => {
            error!("failed to read {}: {}", args.config, e);
            return std::process::ExitCode::FAILURE;
        }
    };

    let tables = Arc::new(DeviceTablePair::new());
    let listeners = match load_listeners(&xml, &tables) {
        Ok(listeners) => listeners,
        Err(e) => {
            error!("failed to load {}: {}", args.config, e);
            return std::process::ExitCode::FAILURE;
        }
    };
    if listeners.is_empty() {
        warn!("no listeners declared in {}", args.config);
    }

    let mut tasks = Vec::new();
    for listener in listeners {
        let tables = tables.clone();
        let task = match listener.listener_type.as_str() {
            "rtds" => tokio::spawn(run_rtds(listener.port, listener.state_signals, listener.command_signals, tables)),
            "pscad" => tokio::spawn(run_pscad(listener.port, tables)),
            "simulation" => tokio::spawn(run_simulation(
                listener.port,
                listener.state_signals,
                listener.command_signals,
                tables,
            )),
            other => {
                error!("unknown listener type: {other}");
                continue;
            }
        };
        tasks.push(task);
    }

    for task in tasks {
        let _ = task.await;
    }
    std::process::ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use dgi_adapterd::config::Entry;

    fn sig(d: &str, s: &str) -> DeviceSignal {
        DeviceSignal::new(d, s)
    }

    const SAMPLE: &str = r#"
        <listeners>
          <listener type="rtds" port="7000">
            <state><entry index="1" device="gen1" signal="V" value="0"/></state>
            <command><entry index="1" device="gen1" signal="Q"/></command>
          </listener>
          <listener type="pscad" port="7001">
            <state><entry index="1" device="sst1" signal="gateway"/></state>
            <command><entry index="1" device="sst1" signal="gateway"/></command>
          </listener>
        </listeners>
    "#;

    #[test]
    fn test_load_listeners_orders_signals_by_index() {
        let tables = DeviceTablePair::new();
        let listeners = load_listeners(SAMPLE, &tables).unwrap();
        assert_eq!(listeners.len(), 2);
        assert_eq!(listeners[0].state_signals, vec![sig("gen1", "V")]);
        assert_eq!(listeners[1].command_signals, vec![sig("sst1", "gateway")]);
    }

    #[test]
    fn test_load_listeners_rejects_duplicate_port() {
        let tables = DeviceTablePair::new();
        let xml = r#"<listeners>
            <listener type="rtds" port="7000"/>
            <listener type="pscad" port="7000"/>
        </listeners>"#;
        assert!(matches!(load_listeners(xml, &tables), Err(DgiError::BadSpec(_))));
    }

    #[test]
    fn test_ordered_signals_rejects_gap() {
        let list = Some(EntryList {
            entries: vec![Entry {
                index: 2,
                device: "gen1".into(),
                signal: "V".into(),
                value: None,
                types: None,
            }],
        });
        assert!(matches!(ordered_signals(&list), Err(DgiError::BadSpec(_))));
    }

    #[test]
    fn test_install_initial_values_detects_conflict() {
        let table = DeviceTable::new();
        let mut seen = HashMap::new();
        let first = Some(EntryList {
            entries: vec![Entry {
                index: 1,
                device: "gen1".into(),
                signal: "V".into(),
                value: Some(1.0),
                types: None,
            }],
        });
        install_initial_values(&first, &table, &mut seen).unwrap();
        let second = Some(EntryList {
            entries: vec![Entry {
                index: 1,
                device: "gen1".into(),
                signal: "V".into(),
                value: Some(2.0),
                types: None,
            }],
        });
        assert!(matches!(
            install_initial_values(&second, &table, &mut seen),
            Err(DgiError::BadSpec(_))
        ));
    }

    #[tokio::test]
    async fn test_rtds_cycle_round_trips_floats() {
        let tables = Arc::new(DeviceTablePair::new());
        tables.state.insert(sig("gen1", "V"));
        tables.state.set(&sig("gen1", "V"), 1.0).unwrap();
        tables.command.insert(sig("gen1", "Q"));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = vec![sig("gen1", "V")];
        let command = vec![sig("gen1", "Q")];
        let server_tables = tables.clone();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            loop {
                let mut rx_bytes = vec![0u8; command.len() * 4];
                if stream.read_exact(&mut rx_bytes).await.is_err() {
                    return;
                }
                let values = wire::decode_be_floats(&rx_bytes);
                for (key, value) in command.iter().zip(values) {
                    server_tables.command.set(key, value).unwrap();
                }
                let mut tx_values = Vec::new();
                for key in &state {
                    tx_values.push(server_tables.state.get(key).unwrap());
                }
                stream.write_all(&wire::encode_be_floats(&tx_values)).await.unwrap();
            }
        });

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client.write_all(&wire::encode_be_floats(&[0.5])).await.unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(wire::decode_be_floats(&reply), vec![1.0]);
        assert_eq!(tables.command.get(&sig("gen1", "Q")).unwrap(), 0.5);
    }
}
