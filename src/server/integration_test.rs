//! Full-stack tests: boot the real server on an ephemeral port and drive
//! it over a WebSocket client, covering the wire scenarios end to end —
//! ping, blob upload + pwrite, pread bounds, terminal lifecycle, and
//! telemetry cadence.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::Config;
use crate::rpc::frame::TERMINAL_FLAG;
use crate::server::Server;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// Boot a server with the given telemetry period; returns its address.
async fn start_server(query_period: u64) -> std::net::SocketAddr {
    let config = Config {
        listen: "127.0.0.1:0".to_string(),
        ssl: None,
        query_period,
        monitor_path: "/".into(),
    };
    let server = Server::bind(&config).await.expect("bind ephemeral port");
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

async fn connect(addr: std::net::SocketAddr) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .expect("connect to server");
    ws
}

/// Send a request and read frames until the matching response arrives.
/// Binary frames arriving before the response (pread blobs, terminal close
/// frames) are returned alongside it; telemetry events are skipped.
async fn rpc_call_collecting(
    ws: &mut Ws,
    id: u64,
    method: &str,
    params: Value,
) -> (Value, Vec<Vec<u8>>) {
    let request = json!({"id": id, "method": method, "params": params}).to_string();
    ws.send(Message::Text(request)).await.expect("send request");
    let mut binaries = Vec::new();
    loop {
        match recv(ws).await {
            Message::Text(text) => {
                let value: Value = serde_json::from_str(&text).expect("valid response JSON");
                if value["id"] == json!(id) {
                    return (value, binaries);
                }
            }
            Message::Binary(data) => binaries.push(data),
            _ => {}
        }
    }
}

/// [`rpc_call_collecting`] for calls that must not produce binary frames.
async fn rpc_call(ws: &mut Ws, id: u64, method: &str, params: Value) -> Value {
    let (value, binaries) = rpc_call_collecting(ws, id, method, params).await;
    assert!(binaries.is_empty(), "unexpected binary frames: {binaries:?}");
    value
}

/// Read frames until a binary frame arrives.
async fn next_binary(ws: &mut Ws) -> Vec<u8> {
    loop {
        if let Message::Binary(data) = recv(ws).await {
            return data;
        }
    }
}

async fn recv(ws: &mut Ws) -> Message {
    tokio::time::timeout(RECV_TIMEOUT, ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed")
        .expect("transport error")
}

fn terminal_frame(id: u32, payload: &[u8]) -> Message {
    let mut data = (id | TERMINAL_FLAG).to_be_bytes().to_vec();
    data.extend_from_slice(payload);
    Message::Binary(data)
}

#[tokio::test(flavor = "multi_thread")]
async fn ping_pong() {
    let addr = start_server(60).await;
    let mut ws = connect(addr).await;
    let reply = rpc_call(&mut ws, 1, "ping", json!([])).await;
    assert_eq!(reply, json!({"id": 1, "result": "pong"}));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_method_returns_error() {
    let addr = start_server(60).await;
    let mut ws = connect(addr).await;
    let reply = rpc_call(&mut ws, 1, "no.such.method", json!([])).await;
    assert!(reply["error"]["message"]
        .as_str()
        .unwrap()
        .contains("unknown method"));
}

#[tokio::test(flavor = "multi_thread")]
async fn blob_write_roundtrip() {
    let addr = start_server(60).await;
    let mut ws = connect(addr).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("x");
    let path_str = path.to_str().unwrap();

    // Upload blob 42, then spend it on a pwrite.
    let mut upload = 42u32.to_be_bytes().to_vec();
    upload.extend_from_slice(b"hello");
    ws.send(Message::Binary(upload)).await.unwrap();

    let reply = rpc_call(&mut ws, 2, "fs.pwrite", json!([path_str, 0, 42])).await;
    assert_eq!(reply["result"], 5);
    assert_eq!(std::fs::read(&path).unwrap(), b"hello");

    // The blob was consumed; a second pwrite must fail.
    let reply = rpc_call(&mut ws, 3, "fs.pwrite", json!([path_str, 0, 42])).await;
    assert_eq!(reply["error"]["message"], "blob not found");
}

#[tokio::test(flavor = "multi_thread")]
async fn pwrite_at_offset_extends_the_file() {
    let addr = start_server(60).await;
    let mut ws = connect(addr).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sparse");
    let path_str = path.to_str().unwrap();

    let mut upload = 7u32.to_be_bytes().to_vec();
    upload.extend_from_slice(b"tail");
    ws.send(Message::Binary(upload)).await.unwrap();

    let reply = rpc_call(&mut ws, 1, "fs.pwrite", json!([path_str, 3, 7])).await;
    assert_eq!(reply["result"], 4);
    let content = std::fs::read(&path).unwrap();
    assert_eq!(&content[3..], b"tail");
    assert_eq!(content.len(), 7);
}

#[tokio::test(flavor = "multi_thread")]
async fn pread_bounds_and_eof() {
    let addr = start_server(60).await;
    let mut ws = connect(addr).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("x");
    std::fs::write(&path, b"12345").unwrap();
    let path_str = path.to_str().unwrap();

    // Size 0 and size > 16384 are rejected.
    let reply = rpc_call(&mut ws, 1, "fs.pread", json!([path_str, 0, 0])).await;
    assert!(reply["error"]["message"].as_str().unwrap().contains("size"));
    let reply = rpc_call(&mut ws, 2, "fs.pread", json!([path_str, 0, 16385])).await;
    assert!(reply["error"]["message"].as_str().unwrap().contains("size"));

    // Reading past EOF yields a null blob and no binary frame.
    let reply = rpc_call(&mut ws, 3, "fs.pread", json!([path_str, 100, 10])).await;
    assert_eq!(reply["result"], json!({"blob": null}));
}

#[tokio::test(flavor = "multi_thread")]
async fn pread_pushes_the_bytes_as_a_blob_frame() {
    let addr = start_server(60).await;
    let mut ws = connect(addr).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data");
    std::fs::write(&path, b"abcdefgh").unwrap();
    let path_str = path.to_str().unwrap();

    // The blob frame is pushed before the response on the same queue.
    let (reply, binaries) = rpc_call_collecting(&mut ws, 1, "fs.pread", json!([path_str, 2, 4])).await;
    let blob_id = reply["result"]["blob"].as_u64().unwrap() as u32;
    assert!(blob_id <= crate::rpc::frame::MAX_ID);

    assert_eq!(binaries.len(), 1);
    let frame = &binaries[0];
    assert_eq!(&frame[..4], &blob_id.to_be_bytes());
    assert_eq!(&frame[4..], b"cdef");
}

#[tokio::test(flavor = "multi_thread")]
async fn terminal_lifecycle() {
    let addr = start_server(60).await;
    let mut ws = connect(addr).await;

    let reply = rpc_call(&mut ws, 1, "shell.open", json!(["cat", []])).await;
    let id = reply["result"].as_u64().unwrap() as u32;

    // Input is echoed back through the PTY with the flagged id prefix.
    ws.send(terminal_frame(id, b"ping\n")).await.unwrap();
    let mut echoed = Vec::new();
    while !echoed.windows(4).any(|w| w == b"ping") {
        let frame = next_binary(&mut ws).await;
        assert_eq!(&frame[..4], &(id | TERMINAL_FLAG).to_be_bytes());
        assert!(frame.len() > 4, "terminal closed before echoing");
        echoed.extend_from_slice(&frame[4..]);
    }

    // Close: the linked client receives the zero-payload close frame just
    // before the response. Residual echo output may precede it.
    let (reply, binaries) = rpc_call_collecting(&mut ws, 2, "shell.close", json!([id])).await;
    assert_eq!(reply["result"], Value::Null);
    let close_frame = binaries.last().expect("close frame before the response");
    assert_eq!(close_frame.as_slice(), (id | TERMINAL_FLAG).to_be_bytes().as_slice());
}

#[tokio::test(flavor = "multi_thread")]
async fn orphaned_terminal_ignores_other_clients() {
    let addr = start_server(60).await;

    // Client A opens a terminal and disconnects, orphaning it.
    let mut a = connect(addr).await;
    let reply = rpc_call(&mut a, 1, "shell.open", json!(["cat", []])).await;
    let id = reply["result"].as_u64().unwrap() as u32;
    a.close(None).await.unwrap();

    // Client B can neither write to nor close the orphan.
    let mut b = connect(addr).await;
    b.send(terminal_frame(id, b"intruder\n")).await.unwrap();
    let reply = rpc_call(&mut b, 1, "shell.close", json!([id])).await;
    assert_eq!(reply["result"], Value::Null);

    // The server is still healthy and B never received terminal output.
    let reply = rpc_call(&mut b, 2, "ping", json!([])).await;
    assert_eq!(reply["result"], "pong");
}

#[tokio::test(flavor = "multi_thread")]
async fn telemetry_events_arrive_in_order() {
    let addr = start_server(1).await;
    let mut ws = connect(addr).await;

    // Collect one full tick: cpustat, sysinfo, diskspace.
    let mut topics = Vec::new();
    while topics.len() < 3 {
        if let Message::Text(text) = recv(&mut ws).await {
            let value: Value = serde_json::from_str(&text).unwrap();
            if let Some(topic) = value["method"].as_str() {
                topics.push(topic.to_string());
            }
        }
    }
    assert_eq!(topics, ["sysinfo.cpustat", "sysinfo.sysinfo", "sysinfo.diskspace"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn fs_listing_over_the_wire() {
    let addr = start_server(60).await;
    let mut ws = connect(addr).await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();

    let reply = rpc_call(&mut ws, 1, "fs.ls", json!([dir.path()])).await;
    let entries = reply["result"].as_array().unwrap();
    assert_eq!(entries.len(), 2);

    let reply = rpc_call(&mut ws, 2, "fs.exists", json!([dir.path().join("a.txt")])).await;
    assert_eq!(reply["result"], true);

    let reply = rpc_call(&mut ws, 3, "fs.stat", json!([dir.path().join("a.txt")])).await;
    assert_eq!(reply["result"]["type"], "file");
}
