//! Gremlin Server driver.
//!
//! # Data Flow
//! ```text
//! LoadBalancer::dispatch_*(|session| ...)
//!     → GremlinSession::submit / submit_all / stream
//!     → WebSocket binary frame (mime prefix + GraphSON 3 JSON)
//!     → Gremlin Server
//!     ← response frames (206 partial, 200/204 final, error codes)
//! ```
//!
//! # Design Decisions
//! - One WebSocket per backend, shared by all in-flight requests
//! - Results are passed through as raw GraphSON values; the balancer
//!   only cares whether a request succeeded
//! - `g` is always aliased to the configured traversal source

pub mod client;
pub mod types;

pub use client::{GremlinConnector, GremlinSession, ResultStream, PROBE_SCRIPT};
pub use types::{SessionError, SessionResult};
