//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Passive (dispatcher):
//!     Operation fails on a backend
//!     → backend marked down (leaves rotation immediately)
//!
//! Active (active.rs):
//!     Periodic timer
//!     → For each down backend, concurrently:
//!         no session     → reopen → probe
//!         closed session → discard → reopen → probe
//!         live session   → probe
//!     → probe ok: backend back in rotation
//! ```
//!
//! # State Machine (per backend)
//! ```text
//! DOWN (no session) ──reopen──▶ DOWN (session, unprobed) ──probe ok──▶ HEALTHY
//!        ▲                              │ probe fails                     │
//!        └── session found closed ◀─────┘                                │
//!                                                  operation fails ───────┘ → DOWN
//! ```
//!
//! # Design Decisions
//! - Healthy backends are not probed; failures there are found by traffic
//! - Probes are bounded by a timeout shorter than the interval
//! - Out-of-range settings are clamped, never allowed to stop the monitor

pub mod active;

pub use active::{HealthMonitor, HealthSettings};
