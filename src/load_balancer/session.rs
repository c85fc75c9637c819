//! Session seam between the balancer and a concrete backend driver.
//!
//! # Responsibilities
//! - Define how sessions are opened (`Connector`)
//! - Define the minimal surface the balancer needs from a session (`Session`)
//!
//! # Design Decisions
//! - The balancer never inspects operation payloads; it only needs
//!   probe/close/liveness from a session
//! - Connect attempts are bounded by a timeout owned by the caller

use async_trait::async_trait;
use std::time::Duration;
use tokio::time;

use crate::load_balancer::types::{BalancerError, BoxError};
use crate::net::Endpoint;

/// An open, reusable connection to one backend.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Issue a lightweight reachability check.
    async fn probe(&self) -> Result<(), BoxError>;

    /// Close the connection. Must be safe to call more than once.
    async fn close(&self);

    /// Whether the underlying connection is known to be gone.
    fn is_closed(&self) -> bool;
}

/// Opens sessions to backends.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: Session;

    /// Open a session bound to `traversal_source` on the given endpoint.
    async fn connect(&self, endpoint: &Endpoint, traversal_source: &str) -> Result<Self::Session, BoxError>;
}

/// Open a session, bounded by `timeout`.
pub(crate) async fn open_session<C: Connector>(
    connector: &C,
    endpoint: &Endpoint,
    traversal_source: &str,
    timeout: Duration,
) -> Result<C::Session, BalancerError> {
    match time::timeout(timeout, connector.connect(endpoint, traversal_source)).await {
        Ok(Ok(session)) => Ok(session),
        Ok(Err(source)) => Err(BalancerError::ConnectionOpen {
            endpoint: endpoint.to_string(),
            source,
        }),
        Err(_) => Err(BalancerError::ConnectionOpen {
            endpoint: endpoint.to_string(),
            source: format!("connect timed out after {:?}", timeout).into(),
        }),
    }
}
