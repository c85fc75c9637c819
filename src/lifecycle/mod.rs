//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (CLI):
//!     Load config → Validate → Build balancer (connect all) → Spawn health monitor
//!
//! Shutdown:
//!     Signal received → watch loop ends → LoadBalancer::close
//!     → shutdown.rs trigger → monitor exits → sessions closed
//! ```
//!
//! # Design Decisions
//! - Construction never fails on unreachable backends; they start down
//! - Close waits for the monitor before touching sessions

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
