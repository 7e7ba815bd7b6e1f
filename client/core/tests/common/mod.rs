//! Scripted snapd stand-in listening on a Unix socket in a temp dir

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

use snapd_client_core::ClientConfig;

/// A request as the server saw it
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// 1-based index of the connection it arrived on
    pub connection: usize,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// What the server does with a request
pub enum Reply {
    /// Write these bytes
    Bytes(Vec<u8>),
    /// Write these bytes, then close the connection
    BytesThenClose(Vec<u8>),
    /// Close the connection without answering
    Close,
    /// Never answer
    Silence,
}

type Handler = dyn Fn(&RecordedRequest) -> Reply + Send + Sync;

pub struct FakeSnapd {
    _dir: TempDir,
    path: PathBuf,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    connections: Arc<AtomicUsize>,
    handler: Arc<Handler>,
    task: JoinHandle<()>,
}

impl FakeSnapd {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> Reply + Send + Sync + 'static,
    {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapd.socket");
        let listener = UnixListener::bind(&path).unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let handler: Arc<Handler> = Arc::new(handler);

        let task = {
            let requests = Arc::clone(&requests);
            let connections = Arc::clone(&connections);
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let connection = connections.fetch_add(1, Ordering::SeqCst) + 1;
                    tokio::spawn(serve(
                        stream,
                        connection,
                        Arc::clone(&handler),
                        Arc::clone(&requests),
                    ));
                }
            })
        };

        Self {
            _dir: dir,
            path,
            requests,
            connections,
            handler,
            task,
        }
    }

    /// Serve one end of an already connected pair, counted as a connection
    pub fn adopt(&self, stream: UnixStream) {
        let connection = self.connections.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::spawn(serve(
            stream,
            connection,
            Arc::clone(&self.handler),
            Arc::clone(&self.requests),
        ));
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    /// Client config pointing at this server, polling every 10ms
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.transport.socket_path = self.path.clone();
        config.transport.poll_interval_ms = 10;
        config
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, method: &str, target: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.target == target)
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FakeSnapd {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut stream: UnixStream,
    connection: usize,
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        while let Some((request, used)) = parse_request(&buffer, connection) {
            buffer.drain(..used);
            requests.lock().push(request.clone());
            match handler(&request) {
                Reply::Bytes(bytes) => {
                    if stream.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
                Reply::BytesThenClose(bytes) => {
                    let _ = stream.write_all(&bytes).await;
                    return;
                }
                Reply::Close => return,
                Reply::Silence => {}
            }
        }

        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    }
}

fn parse_request(buffer: &[u8], connection: usize) -> Option<(RecordedRequest, usize)> {
    let divider = buffer.windows(4).position(|w| w == b"\r\n\r\n")?;
    let head = std::str::from_utf8(&buffer[..divider]).unwrap();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap().split(' ');
    let method = request_line.next().unwrap().to_string();
    let target = request_line.next().unwrap().to_string();

    let headers: Vec<(String, String)> = lines
        .map(|line| {
            let (name, value) = line.split_once(':').unwrap();
            (name.trim().to_string(), value.trim().to_string())
        })
        .collect();
    let length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("Content-Length"))
        .map_or(0, |(_, v)| v.parse::<usize>().unwrap());

    let start = divider + 4;
    if buffer.len() < start + length {
        return None;
    }

    Some((
        RecordedRequest {
            method,
            target,
            headers,
            body: buffer[start..start + length].to_vec(),
            connection,
        },
        start + length,
    ))
}

// =============================================================================
// Response builders
// =============================================================================

pub fn http(status: u16, reason: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {status} {reason}\r\n").into_bytes();
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

pub fn json_response(status: u16, reason: &str, document: &Value) -> Vec<u8> {
    let body = serde_json::to_vec(document).unwrap();
    http(
        status,
        reason,
        &[
            ("Content-Type", "application/json"),
            ("Content-Length", &body.len().to_string()),
        ],
        &body,
    )
}

pub fn sync_result(result: Value) -> Vec<u8> {
    json_response(
        200,
        "OK",
        &json!({"type": "sync", "status-code": 200, "status": "OK", "result": result}),
    )
}

pub fn accepted(change: &str) -> Vec<u8> {
    json_response(
        202,
        "Accepted",
        &json!({
            "type": "async",
            "status-code": 202,
            "status": "Accepted",
            "change": change,
            "result": null,
        }),
    )
}

pub fn error_response(status: u16, reason: &str, kind: &str, message: &str) -> Vec<u8> {
    json_response(
        status,
        reason,
        &json!({
            "type": "error",
            "status-code": status,
            "status": reason,
            "result": {"kind": kind, "message": message},
        }),
    )
}

/// A change document wrapped in a sync envelope
pub fn change(id: &str, status: &str, ready: bool, extra: Value) -> Vec<u8> {
    let mut result = json!({
        "id": id,
        "kind": "install-snap",
        "summary": "Install \"hello\" snap",
        "status": status,
        "ready": ready,
        "spawn-time": "2024-01-01T10:00:00Z",
    });
    if let (Some(target), Value::Object(fields)) = (result.as_object_mut(), extra) {
        target.extend(fields);
    }
    sync_result(result)
}

/// A JSON body with chunked transfer encoding
pub fn chunked_json(document: &Value, chunk_size: usize) -> Vec<u8> {
    let body = serde_json::to_vec(document).unwrap();
    let mut framed = Vec::new();
    for piece in body.chunks(chunk_size) {
        framed.extend_from_slice(format!("{:x}\r\n", piece.len()).as_bytes());
        framed.extend_from_slice(piece);
        framed.extend_from_slice(b"\r\n");
    }
    framed.extend_from_slice(b"0\r\n\r\n");
    http(
        200,
        "OK",
        &[
            ("Content-Type", "application/json"),
            ("Transfer-Encoding", "chunked"),
        ],
        &framed,
    )
}
