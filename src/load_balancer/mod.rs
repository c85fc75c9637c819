//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Caller operation
//!     → balancer.rs (dispatch_iterate / dispatch_list)
//!     → pool.rs (snapshot healthy backends under read lock)
//!     → round_robin.rs (shared counter mod healthy count)
//!     → backend.rs (pin session handle, run operation)
//!     → on failure: backend marked down, error returned
//!
//! Membership (membership.rs):
//!     add_host / remove_host / sync_endpoints
//!     → normalize address → pool write lock → open/close session outside lock
//! ```
//!
//! # Design Decisions
//! - One structural lock; health flags are lock-free atomics
//! - Selection hands out `Arc` handles, so removal never invalidates a dispatch
//! - No internal retry: the caller decides whether to dispatch again
//! - Unhealthy backends excluded from selection until the health monitor revives them

pub mod backend;
pub mod balancer;
pub mod membership;
pub mod pool;
pub mod round_robin;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{Backend, HealthState};
pub use balancer::LoadBalancer;
pub use membership::SyncReport;
pub use session::{Connector, Session};
pub use types::{BalancerError, BalancerResult, BoxError};
