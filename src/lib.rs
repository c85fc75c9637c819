//! Client-side load balancer for pools of Gremlin graph backends.
//!
//! ```text
//!   callers ──dispatch──▶ LoadBalancer ──select──▶ BackendPool ──▶ Backend ──▶ Session ──▶ Gremlin Server
//!                              │                       ▲
//!                              │ add/remove            │ reopen + probe
//!                              ▼                       │
//!                        membership              HealthMonitor (background)
//! ```

pub mod config;
pub mod gremlin;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;

pub use config::BalancerConfig;
pub use gremlin::{GremlinConnector, GremlinSession};
pub use health::HealthSettings;
pub use load_balancer::{BalancerError, BalancerResult, Connector, LoadBalancer, Session};
pub use net::Endpoint;
