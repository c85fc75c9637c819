//! Active recovery of down backends.
//!
//! # Responsibilities
//! - Periodically revisit backends that are out of rotation
//! - Reopen missing sessions, probe them, and return them to rotation
//!
//! Healthy backends are never probed here; they leave rotation only when a
//! dispatched operation fails against them.

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::load_balancer::{
    backend::Backend,
    pool::BackendPool,
    session::{open_session, Connector, Session},
};
use crate::observability::metrics;

/// Timing for the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSettings {
    /// Time between recovery passes.
    pub interval: Duration,
    /// Upper bound for one probe. Kept below `interval`.
    pub probe_timeout: Duration,
    /// Upper bound for one session open attempt.
    pub connect_timeout: Duration,
}

/// Shortest interval the monitor will run at.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

impl HealthSettings {
    /// Derive probe and connect timeouts from the interval:
    /// half the interval, capped at two seconds.
    pub fn with_interval(interval: Duration) -> Self {
        let bound = (interval / 2).min(Duration::from_secs(2));
        Self {
            interval,
            probe_timeout: bound,
            connect_timeout: bound,
        }
    }

    /// Clamp into a runnable shape: the interval is at least `MIN_INTERVAL`
    /// and both timeouts are non-zero and strictly below the interval.
    /// Out-of-range timeouts fall back to half the interval.
    pub fn sanitized(self) -> Self {
        let interval = self.interval.max(MIN_INTERVAL);
        let fallback = interval / 2;
        let bound = |timeout: Duration| {
            if timeout.is_zero() || timeout >= interval {
                fallback
            } else {
                timeout
            }
        };
        Self {
            interval,
            probe_timeout: bound(self.probe_timeout),
            connect_timeout: bound(self.connect_timeout),
        }
    }

    /// `sanitized`, logging when anything had to change.
    pub(crate) fn sanitized_logged(self) -> Self {
        let sanitized = self.sanitized();
        if sanitized != self {
            tracing::warn!(requested = ?self, using = ?sanitized, "Health settings out of range, clamped");
        }
        sanitized
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self::with_interval(Duration::from_secs(5))
    }
}

pub struct HealthMonitor<C: Connector> {
    pool: Arc<BackendPool<C::Session>>,
    connector: Arc<C>,
    traversal_source: Arc<str>,
    settings: HealthSettings,
}

impl<C: Connector> HealthMonitor<C> {
    pub fn new(
        pool: Arc<BackendPool<C::Session>>,
        connector: Arc<C>,
        traversal_source: Arc<str>,
        settings: HealthSettings,
    ) -> Self {
        Self {
            pool,
            connector,
            traversal_source,
            settings: settings.sanitized_logged(),
        }
    }

    pub fn settings(&self) -> HealthSettings {
        self.settings
    }

    /// Run until the shutdown signal fires.
    ///
    /// The signal is honored before every pass and interrupts a pass in
    /// progress; dropping a pass mid-way never leaves a half-installed session.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            probe_timeout_ms = self.settings.probe_timeout.as_millis() as u64,
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => break,
            }
            tokio::select! {
                _ = self.check_all() => {}
                _ = shutdown.recv() => break,
            }
        }

        tracing::info!("Health monitor received shutdown signal, exiting loop");
    }

    /// One recovery pass over every backend currently out of rotation.
    ///
    /// Backends are revived concurrently, so one stalled probe or connect
    /// never delays the others past its own timeout.
    pub async fn check_all(&self) {
        let down = self.pool.unhealthy();
        join_all(down.iter().map(|backend| self.revive(backend))).await;
        metrics::record_rotation_size(self.pool.healthy_count());
    }

    async fn revive(&self, backend: &Arc<Backend<C::Session>>) {
        let addr = backend.endpoint.as_str();

        let session = match backend.session() {
            Some(session) if session.is_closed() => {
                self.discard(backend, &session).await;
                self.reopen(backend).await
            }
            Some(session) => Some(session),
            None => self.reopen(backend).await,
        };
        let Some(session) = session else {
            return;
        };

        let healthy = match time::timeout(self.settings.probe_timeout, session.probe()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(endpoint = %addr, error = %e, "Health probe failed");
                false
            }
            Err(_) => {
                tracing::warn!(endpoint = %addr, timeout_ms = self.settings.probe_timeout.as_millis() as u64, "Health probe timed out");
                false
            }
        };
        metrics::record_probe(addr, if healthy { "success" } else { "failure" });

        if healthy {
            if self.pool.promote(backend) {
                tracing::info!(endpoint = %addr, "Backend back in rotation");
                metrics::record_backend_health(addr, true);
            }
        } else if session.is_closed() {
            // Lost during the probe; reopened on the next pass.
            self.discard(backend, &session).await;
        }
    }

    async fn discard(&self, backend: &Arc<Backend<C::Session>>, session: &Arc<C::Session>) {
        if self.pool.discard_session(backend, session) {
            tracing::debug!(endpoint = %backend.endpoint, "Discarded closed session");
            session.close().await;
        }
    }

    /// Open and install a session for a backend that has none.
    async fn reopen(&self, backend: &Arc<Backend<C::Session>>) -> Option<Arc<C::Session>> {
        let opened = open_session(
            self.connector.as_ref(),
            &backend.endpoint,
            &self.traversal_source,
            self.settings.connect_timeout,
        )
        .await;

        let session = match opened {
            Ok(session) => Arc::new(session),
            Err(e) => {
                tracing::warn!(endpoint = %backend.endpoint, error = %e, "Reconnect failed, backend stays down");
                return None;
            }
        };

        match self.pool.install_session(backend, session) {
            Ok(session) => {
                tracing::debug!(endpoint = %backend.endpoint, "Session reopened, probing");
                Some(session)
            }
            Err(orphan) => {
                // Removed (or reconnected elsewhere) while we were connecting.
                orphan.close().await;
                None
            }
        }
    }
}
