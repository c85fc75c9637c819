//! Shared utilities for integration testing: an in-process Gremlin Server.
//!
//! The mock answers every `eval` with its own name unless the script asks
//! for something else:
//! - `hang`: never answers
//! - `empty`: 204 with no data
//! - `fail`: 597 script evaluation error
//! - `batches:N`: N partial batches of one item each

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Error code Gremlin Server uses for failed script evaluation.
pub const SCRIPT_EVALUATION_ERROR: u16 = 597;

pub struct MockGremlin {
    pub addr: SocketAddr,
    state: Arc<MockState>,
    accept_task: JoinHandle<()>,
}

struct MockState {
    name: String,
    failing: AtomicBool,
    refusing: AtomicBool,
    requests: AtomicUsize,
    connections: AtomicUsize,
    last_alias: Mutex<Option<String>>,
    kick: watch::Sender<u64>,
}

impl MockGremlin {
    /// Bind to an ephemeral port and start serving.
    pub async fn start(name: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (kick, _) = watch::channel(0);
        let state = Arc::new(MockState {
            name: name.to_string(),
            failing: AtomicBool::new(false),
            refusing: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
            connections: AtomicUsize::new(0),
            last_alias: Mutex::new(None),
            kick,
        });

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                if accept_state.refusing.load(Ordering::SeqCst) {
                    drop(socket);
                    continue;
                }
                tokio::spawn(serve(socket, accept_state.clone()));
            }
        });

        Self {
            addr,
            state,
            accept_task,
        }
    }

    /// `ws://` address of this server.
    pub fn url(&self) -> String {
        format!("ws://{}/gremlin", self.addr)
    }

    /// Answer every request with a script evaluation error.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Drop open connections and refuse new handshakes.
    pub fn go_down(&self) {
        self.state.refusing.store(true, Ordering::SeqCst);
        self.disconnect_all();
    }

    /// Accept handshakes again.
    pub fn come_up(&self) {
        self.state.refusing.store(false, Ordering::SeqCst);
    }

    /// Close every open connection; new ones are still accepted.
    pub fn disconnect_all(&self) {
        self.state.kick.send_modify(|generation| *generation += 1);
    }

    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Completed WebSocket handshakes so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Traversal source the last request aliased `g` to.
    pub fn last_alias(&self) -> Option<String> {
        self.state.last_alias.lock().unwrap().clone()
    }
}

impl Drop for MockGremlin {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.disconnect_all();
    }
}

async fn serve(socket: TcpStream, state: Arc<MockState>) {
    let Ok(ws) = accept_async(socket).await else {
        return;
    };
    state.connections.fetch_add(1, Ordering::SeqCst);
    let (mut tx, mut rx) = ws.split();
    let mut kicked = state.kick.subscribe();

    loop {
        tokio::select! {
            _ = kicked.changed() => {
                let _ = tx.send(Message::Close(None)).await;
                break;
            }
            frame = rx.next() => match frame {
                Some(Ok(Message::Binary(bytes))) => {
                    for reply in state.respond(&bytes) {
                        if tx.send(Message::text(reply.to_string())).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }
}

impl MockState {
    fn respond(&self, frame: &[u8]) -> Vec<Value> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let (mime_len, rest) = frame.split_first().unwrap();
        let request: Value = serde_json::from_slice(&rest[*mime_len as usize..]).unwrap();
        let id = request["requestId"].clone();
        let script = request["args"]["gremlin"].as_str().unwrap_or_default().to_string();
        *self.last_alias.lock().unwrap() = request["args"]["aliases"]["g"].as_str().map(String::from);

        if self.failing.load(Ordering::SeqCst) || script == "fail" {
            return vec![reply(&id, SCRIPT_EVALUATION_ERROR, "injected failure", Value::Null)];
        }

        match script.as_str() {
            "hang" => Vec::new(),
            "empty" => vec![reply(&id, 204, "", Value::Null)],
            s if s.starts_with("batches:") => {
                let n: usize = s["batches:".len()..].parse().unwrap();
                (0..n)
                    .map(|i| {
                        let code = if i + 1 == n { 200 } else { 206 };
                        reply(&id, code, "", graph_list(vec![json!(i)]))
                    })
                    .collect()
            }
            _ => vec![reply(&id, 200, "", graph_list(vec![json!(self.name)]))],
        }
    }
}

fn graph_list(items: Vec<Value>) -> Value {
    json!({ "@type": "g:List", "@value": items })
}

fn reply(id: &Value, code: u16, message: &str, data: Value) -> Value {
    json!({
        "requestId": id,
        "status": { "code": code, "message": message, "attributes": {} },
        "result": { "data": data, "meta": {} },
    })
}

/// An address nothing is listening on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
