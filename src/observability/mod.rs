//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pool / dispatcher / health monitor produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every health transition is logged with the endpoint as a field
//! - Metrics are cheap (facade no-ops until an exporter is installed)

pub mod logging;
pub mod metrics;
