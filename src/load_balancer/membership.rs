//! Runtime membership changes.
//!
//! # Design Decisions
//! - Addresses are normalized before any comparison
//! - Sessions are opened and closed outside the structural lock
//! - Removing a backend never disturbs a dispatch already holding it

use std::collections::HashSet;

use crate::load_balancer::{
    backend::Backend,
    balancer::LoadBalancer,
    pool::InsertRejected,
    session::{open_session, Connector, Session},
    types::{BalancerError, BalancerResult},
};
use crate::net::Endpoint;
use crate::observability::metrics;

/// Outcome of reconciling membership against a desired endpoint list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

fn normalize(address: &str) -> BalancerResult<Endpoint> {
    Endpoint::parse(address).map_err(|reason| BalancerError::InvalidAddress {
        address: address.to_string(),
        reason,
    })
}

impl<C: Connector> LoadBalancer<C> {
    /// Add a backend at runtime.
    ///
    /// The backend joins rotation immediately if its session opens, otherwise
    /// it is added down and left to the health monitor. Adding an address
    /// that is already registered is a no-op.
    pub async fn add_host(&self, address: &str) -> BalancerResult<()> {
        if self.is_closed() {
            return Err(BalancerError::Closed);
        }
        let endpoint = normalize(address)?;
        if self.pool.contains(&endpoint) {
            tracing::info!(endpoint = %endpoint, "Backend already registered");
            return Ok(());
        }

        let session = match open_session(
            self.connector.as_ref(),
            &endpoint,
            &self.traversal_source,
            self.settings.connect_timeout,
        )
        .await
        {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(endpoint = %endpoint, error = %e, "New backend unreachable, adding it down");
                None
            }
        };
        let connected = session.is_some();

        match self.pool.insert(Backend::new(endpoint, session)) {
            Ok(backend) => {
                tracing::info!(endpoint = %backend.endpoint, healthy = connected, "Backend added");
                metrics::record_backend_health(backend.endpoint.as_str(), connected);
                metrics::record_rotation_size(self.pool.healthy_count());
            }
            Err(InsertRejected::Duplicate(duplicate)) => {
                // Lost a race with a concurrent add of the same address.
                tracing::info!(endpoint = %duplicate.endpoint, "Backend already registered");
                if let Some(session) = duplicate.session() {
                    session.close().await;
                }
            }
            Err(InsertRejected::Sealed(rejected)) => {
                // close() drained the pool while we were connecting.
                tracing::info!(endpoint = %rejected.endpoint, "Balancer closed during add, dropping new session");
                if let Some(session) = rejected.session() {
                    session.close().await;
                }
                return Err(BalancerError::Closed);
            }
        }
        Ok(())
    }

    /// Remove a backend at runtime and close its session.
    ///
    /// Unknown addresses are logged and ignored.
    pub async fn remove_host(&self, address: &str) -> BalancerResult<()> {
        let endpoint = normalize(address)?;

        let Some((backend, session)) = self.pool.remove(&endpoint) else {
            tracing::warn!(endpoint = %endpoint, "Remove requested for unknown backend");
            return Ok(());
        };

        if let Some(session) = session {
            session.close().await;
        }
        tracing::info!(endpoint = %backend.endpoint, "Backend removed");
        metrics::record_backend_health(backend.endpoint.as_str(), false);
        metrics::record_rotation_size(self.pool.healthy_count());
        Ok(())
    }

    /// Reconcile membership with `addresses`.
    ///
    /// Backends absent from the list are removed, new ones are added, and
    /// backends present in both keep their sessions and health state.
    /// Invalid addresses in the list are logged and skipped.
    pub async fn sync_endpoints<A: AsRef<str>>(&self, addresses: &[A]) -> BalancerResult<SyncReport> {
        let mut desired: Vec<Endpoint> = Vec::with_capacity(addresses.len());
        for raw in addresses {
            match Endpoint::parse(raw.as_ref()) {
                Ok(ep) if !desired.contains(&ep) => desired.push(ep),
                Ok(_) => {}
                Err(e) => tracing::warn!(address = raw.as_ref(), error = %e, "Invalid backend address ignored"),
            }
        }

        let current: HashSet<Endpoint> = self.pool.endpoints().into_iter().collect();
        let wanted: HashSet<&Endpoint> = desired.iter().collect();
        let mut report = SyncReport::default();

        for ep in current.iter().filter(|ep| !wanted.contains(ep)) {
            self.remove_host(ep.as_str()).await?;
            report.removed.push(ep.to_string());
        }
        for ep in desired.iter().filter(|ep| !current.contains(*ep)) {
            self.add_host(ep.as_str()).await?;
            report.added.push(ep.to_string());
        }

        report.removed.sort();
        if !report.is_empty() {
            tracing::info!(added = report.added.len(), removed = report.removed.len(), "Backend membership synchronized");
        }
        Ok(report)
    }
}
