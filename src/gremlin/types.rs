//! Gremlin Server wire types and error definitions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Serializer requested on every frame.
pub const MIME_TYPE: &str = "application/vnd.gremlin-v3.0+json";

/// Response status codes that carry results.
pub mod status {
    pub const SUCCESS: u16 = 200;
    pub const NO_CONTENT: u16 = 204;
    pub const PARTIAL_CONTENT: u16 = 206;
}

/// Errors that can occur on a Gremlin session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// WebSocket handshake or transport failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The server answered the request with an error status.
    #[error("server error {code}: {message}")]
    Server { code: u16, message: String },

    /// A frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection is gone.
    #[error("session closed")]
    Closed,
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// An `eval` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage<'a> {
    pub request_id: Uuid,
    pub op: &'a str,
    pub processor: &'a str,
    pub args: RequestArgs<'a>,
}

#[derive(Debug, Serialize)]
pub struct RequestArgs<'a> {
    pub gremlin: &'a str,
    pub bindings: Map<String, Value>,
    pub language: &'a str,
    pub aliases: HashMap<&'a str, &'a str>,
}

impl<'a> RequestMessage<'a> {
    /// Build an `eval` request that binds `g` to `traversal_source`.
    pub fn eval(script: &'a str, traversal_source: &'a str, bindings: Map<String, Value>) -> Self {
        let mut aliases = HashMap::new();
        aliases.insert("g", traversal_source);
        Self {
            request_id: Uuid::new_v4(),
            op: "eval",
            processor: "",
            args: RequestArgs {
                gremlin: script,
                bindings,
                language: "gremlin-groovy",
                aliases,
            },
        }
    }

    /// Encode as a binary frame: mime length byte, mime type, JSON body.
    pub fn encode(&self) -> SessionResult<Vec<u8>> {
        let body = serde_json::to_vec(self).map_err(|e| SessionError::Protocol(e.to_string()))?;
        let mut frame = Vec::with_capacity(1 + MIME_TYPE.len() + body.len());
        frame.push(MIME_TYPE.len() as u8);
        frame.extend_from_slice(MIME_TYPE.as_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }
}

/// A response frame.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMessage {
    #[serde(default)]
    pub request_id: Option<Uuid>,
    pub status: ResponseStatus,
    #[serde(default)]
    pub result: ResponseResult,
}

#[derive(Debug, Deserialize)]
pub struct ResponseStatus {
    pub code: u16,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponseResult {
    #[serde(default)]
    pub data: Value,
}

impl ResponseMessage {
    pub fn decode(payload: &[u8]) -> SessionResult<Self> {
        serde_json::from_slice(payload).map_err(|e| SessionError::Protocol(e.to_string()))
    }
}

/// Flatten a result payload into individual items.
///
/// GraphSON 3 wraps batches as `{"@type": "g:List", "@value": [...]}`;
/// plain arrays and scalars are accepted too. Items are returned as-is.
pub fn into_items(data: Value) -> Vec<Value> {
    match data {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        Value::Object(mut obj) if obj.get("@type").and_then(Value::as_str) == Some("g:List") => {
            match obj.remove("@value") {
                Some(Value::Array(items)) => items,
                Some(Value::Null) | None => Vec::new(),
                Some(other) => vec![other],
            }
        }
        other => vec![other],
    }
}
