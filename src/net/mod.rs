//! Network addressing.
//!
//! # Data Flow
//! ```text
//! Configured / runtime address string
//!     → address.rs (normalize to scheme://host:port/path)
//!     → Endpoint (identity used by the backend pool)
//!     → Connector (opens the session)
//! ```
//!
//! # Design Decisions
//! - Identity is the canonical string, never the raw input
//! - Normalization happens once, at the pool boundary

pub mod address;

pub use address::{AddressError, Endpoint};
