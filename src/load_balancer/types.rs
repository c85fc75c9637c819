//! Load balancer error definitions.

use thiserror::Error;

use crate::net::AddressError;

/// Boxed error returned by sessions and caller-supplied operations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the load balancer.
#[derive(Debug, Error)]
pub enum BalancerError {
    /// No backend is currently both connected and healthy.
    #[error("no healthy hosts available")]
    NoHealthyHosts,

    /// Opening a session to a backend failed.
    #[error("failed to open session to {endpoint}: {source}")]
    ConnectionOpen {
        endpoint: String,
        #[source]
        source: BoxError,
    },

    /// The caller's operation failed against the selected backend.
    #[error("operation failed on {endpoint}: {source}")]
    Operation {
        endpoint: String,
        #[source]
        source: BoxError,
    },

    /// The selected backend lost its session before the operation ran.
    #[error("session to {endpoint} is no longer available")]
    SessionUnavailable { endpoint: String },

    /// A membership call was given an address that cannot be normalized.
    #[error("invalid backend address '{address}': {reason}")]
    InvalidAddress {
        address: String,
        #[source]
        reason: AddressError,
    },

    /// The balancer has been closed.
    #[error("load balancer is closed")]
    Closed,
}

impl BalancerError {
    /// Endpoint the error is attributed to, if any.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            BalancerError::ConnectionOpen { endpoint, .. }
            | BalancerError::Operation { endpoint, .. }
            | BalancerError::SessionUnavailable { endpoint } => Some(endpoint),
            _ => None,
        }
    }
}

/// Result type for load balancer operations.
pub type BalancerResult<T> = Result<T, BalancerError>;
