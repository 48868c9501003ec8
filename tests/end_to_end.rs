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

//! Black-box wire-protocol scenarios driven over real sockets, one per
//! adapter variant, matching the end-to-end scenarios enumerated for this
//! subsystem: a peer that speaks the wire protocol directly, with no
//! knowledge of the adapter's internals.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use dgi_adapterd::adapter::pnp::{PnpAdapter, DEFAULT_HEARTBEAT};
use dgi_adapterd::adapter::pscad::PscadAdapter;
use dgi_adapterd::adapter::rtds::RtdsAdapter;
use dgi_adapterd::adapter::Adapter;
use dgi_adapterd::devices::manager::DeviceManager;
use dgi_adapterd::devices::table::DeviceTablePair;
use dgi_adapterd::wire;

#[tokio::test]
async fn rtds_round_trip() {
    use dgi_adapterd::devices::device::{Descriptor, Device};
    use std::collections::HashSet;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // The adapter writes its command buffer (initially 0.0) before it reads
    // state, so the peer's first read sees the initial command, not state.
    let peer = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut rx = [0u8; 4];
        stream.read_exact(&mut rx).await.unwrap();
        assert_eq!(wire::decode_be_floats(&rx), vec![0.0]);
        stream.write_all(&wire::encode_be_floats(&[1.0])).await.unwrap();
        stream
    });

    let tables = Arc::new(DeviceTablePair::new());
    let manager = Arc::new(DeviceManager::new());
    let adapter = RtdsAdapter::new(
        "rtds1".into(),
        "127.0.0.1".into(),
        port,
        1,
        1,
        Duration::from_millis(5),
        tables.clone(),
        manager.clone(),
        Arc::new(|_id: &str| {}),
    );
    adapter.register_state_index("gen1", "V", 1).unwrap();
    adapter.register_command_index("gen1", "Q", 1).unwrap();
    adapter.register_device("gen1");

    let descriptor = Descriptor {
        types: HashSet::from(["Generator".to_string()]),
        states: HashSet::from(["V".to_string()]),
        commands: HashSet::from(["Q".to_string()]),
    };
    manager
        .add(Device::new("gen1".to_string(), descriptor, adapter.clone(), tables))
        .unwrap();

    assert_eq!(manager.net("Generator", "V"), 0.0);
    adapter.start().unwrap();

    let mut stream = peer.await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(manager.exists("gen1"));
    assert_eq!(adapter.get_state("gen1", "V").unwrap(), 1.0);

    adapter.set_command("gen1", "Q", 0.5).unwrap();

    let mut rx2 = [0u8; 4];
    stream.read_exact(&mut rx2).await.unwrap();
    assert_eq!(wire::decode_be_floats(&rx2), vec![0.5]);

    adapter.stop();
}

#[tokio::test]
async fn pscad_success_then_not_found_then_quit() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let tables = Arc::new(DeviceTablePair::new());
    tables.command.insert(dgi_adapterd::devices::signal::DeviceSignal::new("sst1", "gateway"));
    tables.state.insert(dgi_adapterd::devices::signal::DeviceSignal::new("sst1", "gateway"));

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                return;
            }
            let request = line.trim_end_matches(['\r', '\n']);
            let mut parts = request.split_whitespace();
            match parts.next() {
                Some("SET") => {
                    let (_d, _s, v) = (parts.next().unwrap(), parts.next().unwrap(), parts.next().unwrap());
                    assert_eq!(v, "2.5");
                    write_half.write_all(b"200 OK\r\n").await.unwrap();
                }
                Some("GET") => {
                    let d = parts.next().unwrap();
                    if d == "ghost" {
                        write_half.write_all(b"404 ERROR NOTFOUND\r\n").await.unwrap();
                    } else {
                        write_half.write_all(b"200 OK 2.5\r\n").await.unwrap();
                    }
                }
                Some("QUIT") => {
                    write_half.write_all(b"200 OK\r\n").await.unwrap();
                    return;
                }
                _ => {
                    write_half.write_all(b"400 BADREQUEST\r\n").await.unwrap();
                }
            }
        }
    });

    let adapter =
        PscadAdapter::new("pscad1".into(), "127.0.0.1".into(), port, tables);
    // PscadAdapter speaks synchronous std::net I/O; run it off the async
    // runtime's worker thread so it does not block the listener task above.
    let set_result =
        tokio::task::spawn_blocking(move || -> (Arc<PscadAdapter>, dgi_adapterd::error::Result<()>, dgi_adapterd::error::Result<f32>, dgi_adapterd::error::Result<f32>) {
            adapter.start().unwrap();
            let set = adapter.set_command("sst1", "gateway", 2.5);
            let get_ok = adapter.get_state("sst1", "gateway");
            let get_missing = adapter.get_state("ghost", "x");
            (adapter, set, get_ok, get_missing)
        })
        .await
        .unwrap();

    let (adapter, set, get_ok, get_missing) = set_result;
    assert!(set.is_ok());
    assert_eq!(get_ok.unwrap(), 2.5);
    assert!(matches!(get_missing, Err(dgi_adapterd::error::DgiError::ProtocolError { code: 404, .. })));

    tokio::task::spawn_blocking(move || adapter.stop()).await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn pnp_happy_path_reveals_device() {
    use dgi_adapterd::devices::device::{Descriptor, Device};
    use std::collections::HashSet;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let tables = Arc::new(DeviceTablePair::new());
    let manager = Arc::new(DeviceManager::new());
    let adapter = PnpAdapter::new(
        "mamba3".into(),
        port,
        DEFAULT_HEARTBEAT,
        1,
        1,
        tables.clone(),
        manager.clone(),
        Arc::new(|_id: &str| {}),
    );
    adapter.register_state_index("mamba3:sst", "gateway", 1).unwrap();
    adapter.register_command_index("mamba3:sst", "gateway", 1).unwrap();
    adapter.register_device("mamba3:sst");

    let descriptor = Descriptor {
        types: HashSet::new(),
        states: HashSet::from(["gateway".to_string()]),
        commands: HashSet::from(["gateway".to_string()]),
    };
    manager
        .add(Device::new("mamba3:sst".to_string(), descriptor, adapter.clone(), tables))
        .unwrap();

    assert!(!manager.exists("mamba3:sst"));
    drop(listener);
    adapter.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    client.write_all(b"DeviceStates\r\nsst gateway 3.14\r\n\r\n").await.unwrap();

    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = client.read(&mut byte).await.unwrap();
        assert_ne!(n, 0);
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    let reply = String::from_utf8(buf).unwrap();
    assert!(reply.starts_with("DeviceCommands\r\n"));
    assert!(reply.contains("sst gateway 1e8") || reply.contains("sst gateway 100000000"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(manager.exists("mamba3:sst"));
    assert_eq!(adapter.get_state("mamba3:sst", "gateway").unwrap(), 3.14);

    adapter.stop();
}

#[tokio::test]
async fn pnp_heartbeat_timeout_removes_adapter() {
    use dgi_adapterd::devices::device::{Descriptor, Device};
    use std::collections::HashSet;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let tables = Arc::new(DeviceTablePair::new());
    let manager = Arc::new(DeviceManager::new());
    let removed = Arc::new(std::sync::Mutex::new(None));
    let removed_clone = removed.clone();
    let manager_for_hook = manager.clone();
    let adapter = PnpAdapter::new(
        "mamba3".into(),
        port,
        Duration::from_millis(150),
        1,
        1,
        tables.clone(),
        manager.clone(),
        Arc::new(move |id: &str| {
            // Mirrors `AdapterFactory::remove_adapter`: the caller that
            // owns the adapter is responsible for deleting its devices
            // from the manager once it reports an unrecoverable failure.
            *removed_clone.lock().unwrap() = Some(id.to_string());
            manager_for_hook.remove("mamba3:sst");
        }),
    );
    adapter.register_state_index("mamba3:sst", "gateway", 1).unwrap();
    adapter.register_command_index("mamba3:sst", "gateway", 1).unwrap();
    adapter.register_device("mamba3:sst");

    let descriptor = Descriptor {
        types: HashSet::new(),
        states: HashSet::from(["gateway".to_string()]),
        commands: HashSet::from(["gateway".to_string()]),
    };
    manager
        .add(Device::new("mamba3:sst".to_string(), descriptor, adapter.clone(), tables))
        .unwrap();

    adapter.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // One well-formed exchange reveals the device and re-arms the
    // heartbeat; then the peer goes silent and the timer is left to
    // expire.
    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    client.write_all(b"DeviceStates\r\nsst gateway 1.0\r\n\r\n").await.unwrap();
    let mut buf = vec![0u8; 128];
    let _ = client.read(&mut buf).await.unwrap();

    assert!(manager.exists("mamba3:sst"));

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(removed.lock().unwrap().as_deref(), Some("mamba3"));
    assert!(!manager.exists("mamba3:sst"));
}
