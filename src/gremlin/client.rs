//! Gremlin Server WebSocket session.
//!
//! # Responsibilities
//! - Hold one long-lived WebSocket connection per backend
//! - Multiplex many in-flight requests over it by request id
//! - Stream partial result batches back to each caller
//!
//! # Data Flow
//! ```text
//! submit(script)
//!     → register request id in `pending`
//!     → binary frame (mime prefix + JSON) through the shared writer
//!
//! reader task
//!     → decode response → look up request id
//!         206 → forward batch, keep waiting
//!         200 → forward batch, finish
//!         204 → finish
//!         err → forward error, finish
//!     → on socket close: fail every pending request with `Closed`
//! ```

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{future, SinkExt, Stream, StreamExt};
use serde_json::{Map, Value};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::gremlin::types::{
    into_items, status, RequestMessage, ResponseMessage, SessionError, SessionResult,
};
use crate::load_balancer::{BoxError, Connector, Session};
use crate::net::Endpoint;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Batch = SessionResult<Vec<Value>>;
type Pending = Arc<DashMap<Uuid, mpsc::UnboundedSender<Batch>>>;

/// Bound on the close handshake so `close` cannot hang on a dead peer.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Script used for health probes. `g` is aliased to the traversal source.
pub const PROBE_SCRIPT: &str = "g.inject(1)";

/// Opens `GremlinSession`s.
#[derive(Debug, Clone, Default)]
pub struct GremlinConnector;

impl GremlinConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for GremlinConnector {
    type Session = GremlinSession;

    async fn connect(&self, endpoint: &Endpoint, traversal_source: &str) -> Result<GremlinSession, BoxError> {
        Ok(GremlinSession::open(endpoint, traversal_source).await?)
    }
}

/// A multiplexed connection to one Gremlin Server.
pub struct GremlinSession {
    endpoint: String,
    traversal_source: String,
    writer: Mutex<SplitSink<WsStream, Message>>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl GremlinSession {
    /// Connect and start the response reader.
    pub async fn open(endpoint: &Endpoint, traversal_source: &str) -> SessionResult<Self> {
        let (stream, _response) = connect_async(endpoint.as_str()).await?;
        let (writer, reader) = stream.split();

        let pending: Pending = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            reader,
            pending.clone(),
            closed.clone(),
            endpoint.to_string(),
        ));

        tracing::debug!(endpoint = %endpoint, traversal_source, "Gremlin session opened");

        Ok(Self {
            endpoint: endpoint.to_string(),
            traversal_source: traversal_source.to_string(),
            writer: Mutex::new(writer),
            pending,
            closed,
            reader,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn traversal_source(&self) -> &str {
        &self.traversal_source
    }

    /// Number of requests awaiting their final response.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Submit a script and stream its result batches.
    pub async fn submit(&self, script: &str) -> SessionResult<ResultStream> {
        self.submit_with_bindings(script, Map::new()).await
    }

    /// Submit a parameterized script and stream its result batches.
    pub async fn submit_with_bindings(&self, script: &str, bindings: Map<String, Value>) -> SessionResult<ResultStream> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        let request = RequestMessage::eval(script, &self.traversal_source, bindings);
        let id = request.request_id;
        let frame = request.encode()?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.insert(id, tx);
        // Dropping the stream on any error path below unregisters the id.
        let results = ResultStream {
            id,
            rx,
            pending: self.pending.clone(),
        };

        // The reader marks the session closed before failing pending
        // requests, so a request registered too late is caught here.
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        self.writer.lock().await.send(Message::binary(frame)).await?;
        Ok(results)
    }

    /// Submit a script and collect every batch into one list.
    pub async fn submit_all(&self, script: &str) -> SessionResult<Vec<Value>> {
        let mut results = self.submit(script).await?;
        let mut items = Vec::new();
        while let Some(batch) = results.next().await {
            items.extend(batch?);
        }
        Ok(items)
    }

    /// Lazily submit `script` and yield its batches, owning the session handle.
    ///
    /// Submission errors surface as the stream's single item.
    pub fn stream(self: Arc<Self>, script: impl Into<String>) -> impl Stream<Item = Batch> + Send + 'static {
        let script = script.into();
        futures_util::stream::once(async move { self.submit(&script).await }).flat_map(|submitted| match submitted {
            Ok(results) => results.left_stream(),
            Err(e) => futures_util::stream::once(future::ready(Err(e))).right_stream(),
        })
    }
}

#[async_trait]
impl Session for GremlinSession {
    async fn probe(&self) -> Result<(), BoxError> {
        self.submit_all(PROBE_SCRIPT).await?;
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        {
            let mut writer = self.writer.lock().await;
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await;
        }
        self.reader.abort();
        fail_pending(&self.pending);
        tracing::debug!(endpoint = %self.endpoint, "Gremlin session closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for GremlinSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Result batches for one request.
///
/// Ends after the final response. Dropping it early abandons the request.
pub struct ResultStream {
    id: Uuid,
    rx: mpsc::UnboundedReceiver<Batch>,
    pending: Pending,
}

impl ResultStream {
    pub fn request_id(&self) -> Uuid {
        self.id
    }
}

impl Stream for ResultStream {
    type Item = Batch;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

async fn read_loop(mut reader: SplitStream<WsStream>, pending: Pending, closed: Arc<AtomicBool>, endpoint: String) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => route(&pending, text.as_bytes(), &endpoint),
            Ok(Message::Binary(bytes)) => route(&pending, &bytes, &endpoint),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(endpoint = %endpoint, error = %e, "Gremlin connection error");
                break;
            }
        }
    }

    closed.store(true, Ordering::Release);
    fail_pending(&pending);
    tracing::debug!(endpoint = %endpoint, "Gremlin reader stopped");
}

fn route(pending: &Pending, payload: &[u8], endpoint: &str) {
    let response = match ResponseMessage::decode(payload) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(endpoint = %endpoint, error = %e, "Undecodable Gremlin response");
            return;
        }
    };
    let Some(id) = response.request_id else {
        tracing::warn!(endpoint = %endpoint, code = response.status.code, "Gremlin response without request id");
        return;
    };

    match response.status.code {
        status::PARTIAL_CONTENT => {
            if let Some(tx) = pending.get(&id) {
                let _ = tx.send(Ok(into_items(response.result.data)));
            }
        }
        status::SUCCESS => {
            if let Some((_, tx)) = pending.remove(&id) {
                let _ = tx.send(Ok(into_items(response.result.data)));
            }
        }
        status::NO_CONTENT => {
            pending.remove(&id);
        }
        code => {
            if let Some((_, tx)) = pending.remove(&id) {
                let message = response.status.message.unwrap_or_default();
                let _ = tx.send(Err(SessionError::Server { code, message }));
            }
        }
    }
}

fn fail_pending(pending: &Pending) {
    let ids: Vec<Uuid> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, tx)) = pending.remove(&id) {
            let _ = tx.send(Err(SessionError::Closed));
        }
    }
}
