//! Shared helpers for integration tests: an in-memory client speaking framed
//! JSON-RPC to a server over `tokio::io::duplex`, plus message builders.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use compdb_lsp::transport::codec::{FrameReader, FrameWriter};
use lsp_types::Url;
use serde_json::{Value, json};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Client end of an in-memory connection.
///
/// Messages read while waiting for something specific are kept in a backlog
/// and returned by later waits, so no message is lost.
pub struct TestClient {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
    backlog: VecDeque<Value>,
}

/// Creates a client and the server-side halves to hand to `Connection::serve`
pub fn duplex_pair() -> (TestClient, ReadHalf<DuplexStream>, WriteHalf<DuplexStream>) {
    let (client, server) = tokio::io::duplex(1024 * 1024);
    let (client_read, client_write) = tokio::io::split(client);
    let (server_read, server_write) = tokio::io::split(server);
    let client = TestClient {
        reader: FrameReader::new(client_read),
        writer: FrameWriter::new(client_write),
        backlog: VecDeque::new(),
    };
    (client, server_read, server_write)
}

impl TestClient {
    pub async fn send(&mut self, message: &Value) {
        self.writer.write_message(message).await.unwrap();
    }

    pub async fn send_raw(&mut self, body: &[u8]) {
        self.writer.write_frame(body).await.unwrap();
    }

    /// Next message from the server, `None` once the server closed its end
    pub async fn recv(&mut self) -> Option<Value> {
        if let Some(message) = self.backlog.pop_front() {
            return Some(message);
        }
        self.read_wire().await
    }

    async fn read_wire(&mut self) -> Option<Value> {
        let frame = tokio::time::timeout(TIMEOUT, self.reader.read_frame())
            .await
            .expect("timed out waiting for a message")
            .expect("failed to read frame")?;
        Some(serde_json::from_slice(&frame).unwrap())
    }

    /// Waits for the first message matching `predicate`
    pub async fn wait_for(&mut self, predicate: impl Fn(&Value) -> bool) -> Value {
        if let Some(index) = self.backlog.iter().position(&predicate) {
            return self.backlog.remove(index).unwrap();
        }
        loop {
            let message = self
                .read_wire()
                .await
                .expect("server closed the connection");
            if predicate(&message) {
                return message;
            }
            self.backlog.push_back(message);
        }
    }

    /// Waits for the response carrying `id`
    pub async fn wait_for_response(&mut self, id: impl Into<Value>) -> Value {
        let id = id.into();
        self.wait_for(|message| {
            message.get("method").is_none() && message.get("id") == Some(&id)
        })
        .await
    }

    /// Waits for a server-to-client message with `method`
    pub async fn wait_for_method(&mut self, method: &str) -> Value {
        self.wait_for(|message| message["method"] == method).await
    }

    /// Sends a request and waits for its response
    pub async fn request(&mut self, id: i64, method: &str, params: Value) -> Value {
        self.send(&create_request(id, method, params)).await;
        self.wait_for_response(id).await
    }

    /// Performs the `initialize` / `initialized` handshake
    pub async fn initialize(&mut self, params: Value) -> Value {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": params,
        }))
        .await;
        let response = self.wait_for_response(0).await;
        self.send(&create_initialized_notification()).await;
        response
    }

    /// Messages already read but not yet consumed
    pub fn backlog(&self) -> &VecDeque<Value> {
        &self.backlog
    }
}

pub fn create_request(id: i64, method: &str, params: Value) -> Value {
    let mut request = json!({"jsonrpc": "2.0", "id": id, "method": method});
    if !params.is_null() {
        request["params"] = params;
    }
    request
}

pub fn create_notification(method: &str, params: Value) -> Value {
    let mut notification = json!({"jsonrpc": "2.0", "method": method});
    if !params.is_null() {
        notification["params"] = params;
    }
    notification
}

pub fn create_initialize_params(root: Option<&Path>) -> Value {
    let mut params = json!({"processId": null, "capabilities": {}});
    if let Some(root) = root {
        params["rootUri"] = json!(file_uri(root));
    }
    params
}

pub fn create_initialized_notification() -> Value {
    create_notification("initialized", json!({}))
}

pub fn create_cancel_notification(id: impl Into<Value>) -> Value {
    create_notification("$/cancelRequest", json!({"id": id.into()}))
}

pub fn create_did_open_notification(uri: &Url, language_id: &str, text: &str) -> Value {
    create_notification(
        "textDocument/didOpen",
        json!({
            "textDocument": {
                "uri": uri,
                "languageId": language_id,
                "version": 1,
                "text": text,
            }
        }),
    )
}

pub fn create_did_close_notification(uri: &Url) -> Value {
    create_notification(
        "textDocument/didClose",
        json!({"textDocument": {"uri": uri}}),
    )
}

/// `workspace/didChangeWatchedFiles` reporting each path as changed
pub fn create_did_change_watched_files_notification(paths: &[&Path]) -> Value {
    let changes: Vec<Value> = paths
        .iter()
        .map(|path| json!({"uri": file_uri(path), "type": 2}))
        .collect();
    create_notification(
        "workspace/didChangeWatchedFiles",
        json!({"changes": changes}),
    )
}

pub fn create_hover_params(uri: &Url) -> Value {
    json!({
        "textDocument": {"uri": uri},
        "position": {"line": 0, "character": 0},
    })
}

pub fn file_uri(path: &Path) -> Url {
    Url::from_file_path(path).unwrap()
}

/// Writes a `compile_commands.json` in `dir` with one entry per `(file, flag)`
pub fn write_compile_commands(dir: &Path, entries: &[(&Path, &str)]) {
    let commands: Vec<Value> = entries
        .iter()
        .map(|(file, flag)| {
            json!({
                "directory": dir,
                "file": file,
                "arguments": ["clang", flag, file],
            })
        })
        .collect();
    std::fs::write(
        dir.join("compile_commands.json"),
        Value::Array(commands).to_string(),
    )
    .unwrap();
}
