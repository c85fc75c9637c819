//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BalancerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::BalancerConfig;
use crate::net::{AddressError, Endpoint};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("at least one endpoint is required")]
    NoEndpoints,

    #[error("endpoint '{address}' is invalid: {reason}")]
    InvalidEndpoint { address: String, reason: AddressError },

    #[error("endpoint '{address}' duplicates {canonical}")]
    DuplicateEndpoint { address: String, canonical: String },

    #[error("traversal_source must not be empty")]
    EmptyTraversalSource,

    #[error("health_check.{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("health_check.probe_timeout_ms ({probe_ms}) must be less than interval_ms ({interval_ms})")]
    ProbeNotBelowInterval { probe_ms: u64, interval_ms: u64 },

    #[error("observability.metrics_address '{0}' is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.endpoints.is_empty() {
        errors.push(ValidationError::NoEndpoints);
    }

    let mut seen = HashSet::new();
    for address in &config.endpoints {
        match Endpoint::parse(address) {
            Ok(ep) => {
                if !seen.insert(ep.clone()) {
                    errors.push(ValidationError::DuplicateEndpoint {
                        address: address.clone(),
                        canonical: ep.to_string(),
                    });
                }
            }
            Err(reason) => errors.push(ValidationError::InvalidEndpoint {
                address: address.clone(),
                reason,
            }),
        }
    }

    if config.traversal_source.trim().is_empty() {
        errors.push(ValidationError::EmptyTraversalSource);
    }

    let hc = &config.health_check;
    for (name, value) in [
        ("interval_ms", hc.interval_ms),
        ("probe_timeout_ms", hc.probe_timeout_ms),
        ("connect_timeout_ms", hc.connect_timeout_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroDuration(name));
        }
    }
    if hc.probe_timeout_ms >= hc.interval_ms {
        errors.push(ValidationError::ProbeNotBelowInterval {
            probe_ms: hc.probe_timeout_ms,
            interval_ms: hc.interval_ms,
        });
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidMetricsAddress(obs.metrics_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
