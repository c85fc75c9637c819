//! Load balancer handle: construction, dispatch and teardown.
//!
//! # Dispatch Flow
//! ```text
//! dispatch_*(operation)
//!     → pool.select_next()          (NoHealthyHosts if rotation empty)
//!     → backend.session()           (SessionUnavailable if gone meanwhile)
//!     → operation(session)
//!         ok   → result returned unchanged
//!         err  → backend marked down, error returned (no retry)
//! ```

use futures_util::future::join_all;
use futures_util::{Stream, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

use crate::config::BalancerConfig;
use crate::health::{HealthMonitor, HealthSettings};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{
    backend::Backend,
    pool::BackendPool,
    session::{open_session, Connector, Session},
    types::{BalancerError, BalancerResult, BoxError},
};
use crate::net::Endpoint;
use crate::observability::metrics;

/// Client-side load balancer over a set of backend sessions.
pub struct LoadBalancer<C: Connector> {
    pub(crate) pool: Arc<BackendPool<C::Session>>,
    pub(crate) connector: Arc<C>,
    pub(crate) traversal_source: Arc<str>,
    pub(crate) settings: HealthSettings,
    monitor: Arc<HealthMonitor<C>>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Shutdown,
    closed: AtomicBool,
}

impl<C: Connector> LoadBalancer<C> {
    /// Connect to every endpoint and start the health monitor.
    ///
    /// Never fails as a whole: unreachable endpoints start out of rotation,
    /// and unparseable or duplicate addresses are logged and skipped.
    /// Out-of-range health settings are clamped (see `HealthSettings::sanitized`).
    /// Must be called from within a Tokio runtime.
    pub async fn new<A: AsRef<str>>(
        connector: C,
        endpoints: &[A],
        traversal_source: &str,
        settings: HealthSettings,
    ) -> Self {
        let settings = settings.sanitized_logged();
        let mut unique: Vec<Endpoint> = Vec::with_capacity(endpoints.len());
        for raw in endpoints {
            match Endpoint::parse(raw.as_ref()) {
                Ok(ep) if unique.contains(&ep) => {
                    tracing::warn!(endpoint = %ep, "Duplicate backend address ignored");
                }
                Ok(ep) => unique.push(ep),
                Err(e) => {
                    tracing::warn!(address = raw.as_ref(), error = %e, "Invalid backend address ignored");
                }
            }
        }

        let connector = Arc::new(connector);
        let attempts = unique.iter().map(|ep| {
            open_session(connector.as_ref(), ep, traversal_source, settings.connect_timeout)
        });
        let sessions = join_all(attempts).await;

        let backends: Vec<Backend<C::Session>> = unique
            .into_iter()
            .zip(sessions)
            .map(|(ep, opened)| match opened {
                Ok(session) => {
                    tracing::info!(endpoint = %ep, "Connected to backend");
                    metrics::record_backend_health(ep.as_str(), true);
                    Backend::new(ep, Some(session))
                }
                Err(e) => {
                    tracing::warn!(endpoint = %ep, error = %e, "Backend unreachable at startup, starting down");
                    metrics::record_backend_health(ep.as_str(), false);
                    Backend::new(ep, None)
                }
            })
            .collect();

        let pool = Arc::new(BackendPool::new(backends));
        let traversal_source: Arc<str> = Arc::from(traversal_source);
        let monitor = Arc::new(HealthMonitor::new(
            pool.clone(),
            connector.clone(),
            traversal_source.clone(),
            settings,
        ));

        let shutdown = Shutdown::new();
        let task = tokio::spawn(monitor.clone().run(shutdown.subscribe()));

        tracing::info!(
            backends = pool.len(),
            healthy = pool.healthy_count(),
            traversal_source = %traversal_source,
            "Load balancer ready"
        );
        metrics::record_rotation_size(pool.healthy_count());

        Self {
            pool,
            connector,
            traversal_source,
            settings,
            monitor,
            monitor_task: Mutex::new(Some(task)),
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    /// Build from a loaded configuration.
    pub async fn from_config(connector: C, config: &BalancerConfig) -> Self {
        Self::new(
            connector,
            config.endpoints.as_slice(),
            &config.traversal_source,
            config.health_check.settings(),
        )
        .await
    }

    /// Run an operation that reports a stream of outcome signals.
    ///
    /// Every signal is drained; only the first failure is reported.
    pub async fn dispatch_iterate<F, St, T, E>(&self, operation: F) -> BalancerResult<()>
    where
        F: FnOnce(Arc<C::Session>) -> St,
        St: Stream<Item = Result<T, E>>,
        E: Into<BoxError>,
    {
        let (backend, session) = self.acquire()?;

        let signals = operation(session);
        futures_util::pin_mut!(signals);

        let mut first_failure: Option<BoxError> = None;
        while let Some(signal) = signals.next().await {
            if let Err(e) = signal {
                if first_failure.is_none() {
                    first_failure = Some(e.into());
                }
            }
        }

        match first_failure {
            None => {
                metrics::record_dispatch(backend.endpoint.as_str(), "success");
                Ok(())
            }
            Some(e) => Err(self.fail(&backend, e)),
        }
    }

    /// Run an operation that returns a single list of results.
    pub async fn dispatch_list<F, Fut, T, E>(&self, operation: F) -> BalancerResult<Vec<T>>
    where
        F: FnOnce(Arc<C::Session>) -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
        E: Into<BoxError>,
    {
        let (backend, session) = self.acquire()?;

        match operation(session).await {
            Ok(results) => {
                metrics::record_dispatch(backend.endpoint.as_str(), "success");
                Ok(results)
            }
            Err(e) => Err(self.fail(&backend, e.into())),
        }
    }

    /// Select a backend and pin its current session.
    fn acquire(&self) -> BalancerResult<(Arc<Backend<C::Session>>, Arc<C::Session>)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BalancerError::Closed);
        }

        let backend = self.pool.select_next()?;
        match backend.session() {
            Some(session) => Ok((backend, session)),
            None => {
                // Removed or discarded between selection and use.
                backend.mark_down();
                metrics::record_dispatch(backend.endpoint.as_str(), "unavailable");
                Err(BalancerError::SessionUnavailable {
                    endpoint: backend.endpoint.to_string(),
                })
            }
        }
    }

    /// Record an operation failure: take the backend out of rotation.
    fn fail(&self, backend: &Backend<C::Session>, source: BoxError) -> BalancerError {
        let addr = backend.endpoint.as_str();
        if backend.mark_down() {
            tracing::warn!(endpoint = %addr, error = %source, "Operation failed, backend marked unhealthy");
            metrics::record_backend_health(addr, false);
            metrics::record_rotation_size(self.pool.healthy_count());
        } else {
            tracing::debug!(endpoint = %addr, error = %source, "Operation failed on backend already down");
        }
        metrics::record_dispatch(addr, "failure");

        BalancerError::Operation {
            endpoint: addr.to_string(),
            source,
        }
    }

    /// Run one health pass immediately, outside the monitor's schedule.
    pub async fn check_health(&self) {
        self.monitor.check_all().await;
    }

    /// Configured endpoints in pool order.
    pub fn endpoints(&self) -> Vec<String> {
        self.pool.endpoints().into_iter().map(|ep| ep.to_string()).collect()
    }

    /// Health flags aligned with `endpoints()`.
    pub fn health(&self) -> Vec<bool> {
        self.pool.health()
    }

    /// Number of backends currently in rotation.
    pub fn rotation_size(&self) -> usize {
        self.pool.healthy_count()
    }

    pub fn traversal_source(&self) -> &str {
        &self.traversal_source
    }

    pub fn settings(&self) -> HealthSettings {
        self.settings
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the health monitor, wait for it, then close every session.
    ///
    /// Calling `close` again is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shutdown.trigger();
        let task = self
            .monitor_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Health monitor task ended abnormally");
            }
        }

        let sessions = self.pool.drain_sessions();
        let count = sessions.len();
        for session in sessions {
            session.close().await;
        }
        metrics::record_rotation_size(0);
        tracing::info!(sessions_closed = count, "Load balancer closed");
    }
}

impl<C: Connector> Drop for LoadBalancer<C> {
    fn drop(&mut self) {
        // Without close() the monitor would outlive the handle.
        if let Some(task) = self
            .monitor_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::testing::{FakeConnector, FakeSession};
    use std::collections::HashMap;
    use std::time::Duration;

    fn quiet() -> HealthSettings {
        HealthSettings::with_interval(Duration::from_secs(3600))
    }

    async fn balancer(connector: &FakeConnector, hosts: &[&str]) -> LoadBalancer<FakeConnector> {
        LoadBalancer::new(connector.clone(), hosts, "g", quiet()).await
    }

    async fn pick(lb: &LoadBalancer<FakeConnector>) -> BalancerResult<Vec<String>> {
        lb.dispatch_list(|s: Arc<FakeSession>| async move { Ok::<_, BoxError>(vec![s.host.clone()]) })
            .await
    }

    async fn picks(lb: &LoadBalancer<FakeConnector>, n: usize) -> Vec<String> {
        let mut out = Vec::new();
        for _ in 0..n {
            out.extend(pick(lb).await.unwrap());
        }
        out
    }

    /// Dispatch that fails when it lands on `failing`.
    async fn pick_failing_on(lb: &LoadBalancer<FakeConnector>, failing: &str) -> Result<String, String> {
        let failing = failing.to_string();
        lb.dispatch_list(move |s: Arc<FakeSession>| async move {
            if s.host == failing {
                Err::<Vec<String>, BoxError>(format!("{} exploded", s.host).into())
            } else {
                Ok(vec![s.host.clone()])
            }
        })
        .await
        .map(|mut v| v.remove(0))
        .map_err(|e| e.endpoint().unwrap_or_default().to_string())
    }

    #[tokio::test]
    async fn test_sequential_dispatch_cycles_in_order() {
        let connector = FakeConnector::new();
        let lb = balancer(&connector, &["a", "b", "c"]).await;

        assert_eq!(picks(&lb, 7).await, vec!["a", "b", "c", "a", "b", "c", "a"]);
        lb.close().await;
    }

    #[tokio::test]
    async fn test_construction_tolerates_unreachable_and_bad_addresses() {
        let connector = FakeConnector::new();
        connector.set_reachable("b", false);
        let lb = balancer(&connector, &["a", "b", "ws://A:8182", "ftp://x"]).await;

        assert_eq!(lb.endpoints(), vec!["ws://a:8182/gremlin", "ws://b:8182/gremlin"]);
        assert_eq!(lb.health(), vec![true, false]);
        assert_eq!(picks(&lb, 3).await, vec!["a", "a", "a"]);
        lb.close().await;
    }

    #[tokio::test]
    async fn test_failure_removes_backend_from_rotation() {
        let connector = FakeConnector::new();
        let lb = balancer(&connector, &["a", "b", "c"]).await;

        assert_eq!(picks(&lb, 3).await, vec!["a", "b", "c"]);
        assert_eq!(pick_failing_on(&lb, "b").await, Ok("a".to_string()));
        assert_eq!(pick_failing_on(&lb, "b").await, Err("ws://b:8182/gremlin".to_string()));
        assert_eq!(lb.health(), vec![true, false, true]);

        // counter continues at 5 over [a, c]
        assert_eq!(picks(&lb, 4).await, vec!["c", "a", "c", "a"]);
        lb.close().await;
    }

    #[tokio::test]
    async fn test_rejoin_continues_running_counter() {
        let connector = FakeConnector::new();
        let lb = balancer(&connector, &["a", "b", "c"]).await;

        assert_eq!(picks(&lb, 3).await, vec!["a", "b", "c"]);
        assert!(pick_failing_on(&lb, "b").await.is_ok()); // counter 3 → a
        assert!(pick_failing_on(&lb, "b").await.is_err()); // counter 4 → b, down
        assert_eq!(picks(&lb, 3).await, vec!["c", "a", "c"]); // counters 5..7 over [a, c]

        lb.check_health().await;
        assert_eq!(lb.health(), vec![true, true, true]);

        // counters 8..10 over [a, b, c]
        assert_eq!(picks(&lb, 3).await, vec!["c", "a", "b"]);
        lb.close().await;
    }

    #[tokio::test]
    async fn test_all_down_fails_fast() {
        let connector = FakeConnector::new();
        connector.set_reachable("a", false);
        connector.set_reachable("b", false);
        let lb = balancer(&connector, &["a", "b"]).await;

        let result = tokio::time::timeout(Duration::from_millis(100), pick(&lb)).await.unwrap();
        assert!(matches!(result, Err(BalancerError::NoHealthyHosts)));
        lb.close().await;
    }

    #[tokio::test]
    async fn test_operation_error_is_returned_verbatim() {
        let connector = FakeConnector::new();
        let lb = balancer(&connector, &["a"]).await;

        let err = lb
            .dispatch_list(|_s| async {
                Err::<Vec<()>, _>(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"))
            })
            .await
            .unwrap_err();

        match err {
            BalancerError::Operation { source, .. } => {
                let io = source.downcast_ref::<std::io::Error>().unwrap();
                assert_eq!(io.kind(), std::io::ErrorKind::TimedOut);
            }
            other => panic!("unexpected error: {other}"),
        }
        lb.close().await;
    }

    #[tokio::test]
    async fn test_iterate_drains_all_signals_and_reports_first_failure() {
        let connector = FakeConnector::new();
        let lb = balancer(&connector, &["a", "b"]).await;

        let drained = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = drained.clone();
        let result = lb
            .dispatch_iterate(move |_s| {
                let signals: Vec<Result<(), BoxError>> =
                    vec![Ok(()), Err("first".into()), Ok(()), Err("second".into())];
                futures_util::stream::iter(signals).inspect(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .await;

        assert_eq!(drained.load(Ordering::SeqCst), 4);
        match result {
            Err(BalancerError::Operation { endpoint, source }) => {
                assert_eq!(endpoint, "ws://a:8182/gremlin");
                assert_eq!(source.to_string(), "first");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(lb.health(), vec![false, true]);

        let ok = lb
            .dispatch_iterate(|_s| futures_util::stream::iter(vec![Ok::<_, BoxError>(1), Ok(2)]))
            .await;
        assert!(ok.is_ok());
        lb.close().await;
    }

    #[tokio::test]
    async fn test_monitor_revives_backend_on_next_tick() {
        let connector = FakeConnector::new();
        connector.set_reachable("b", false);
        let settings = HealthSettings::with_interval(Duration::from_millis(50));
        let lb = LoadBalancer::new(connector.clone(), &["a", "b"], "g", settings).await;
        assert_eq!(lb.health(), vec![true, false]);

        connector.set_reachable("b", true);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(lb.health(), vec![true, true]);
        let seen = picks(&lb, 2).await;
        assert!(seen.contains(&"b".to_string()));
        lb.close().await;
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped_and_monitor_survives() {
        let connector = FakeConnector::new();
        connector.set_reachable("b", false);
        let settings = HealthSettings::with_interval(Duration::ZERO);
        let lb = LoadBalancer::new(connector.clone(), &["a", "b"], "g", settings).await;
        assert_eq!(lb.settings(), settings.sanitized());
        assert_eq!(lb.health(), vec![true, false]);

        connector.set_reachable("b", true);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(lb.health(), vec![true, true]);
        let finished = lb.monitor_task.lock().unwrap().as_ref().map(|task| task.is_finished());
        assert_eq!(finished, Some(false));
        lb.close().await;
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_is_balanced() {
        let connector = FakeConnector::new();
        let lb = Arc::new(balancer(&connector, &["a", "b", "c"]).await);

        let mut tasks = Vec::new();
        for _ in 0..30 {
            let lb = lb.clone();
            tasks.push(tokio::spawn(async move { pick(&lb).await.unwrap().remove(0) }));
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for task in tasks {
            *counts.entry(task.await.unwrap()).or_default() += 1;
        }

        let max = counts.values().max().copied().unwrap();
        let min = counts.values().min().copied().unwrap();
        assert_eq!(counts.len(), 3);
        assert!(max - min <= 1, "unbalanced: {counts:?}");
        lb.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_dispatch() {
        let connector = FakeConnector::new();
        let lb = balancer(&connector, &["a", "b"]).await;
        let session = lb.pool.all_backends()[0].session().unwrap();

        lb.close().await;
        lb.close().await;

        assert!(session.is_closed());
        assert_eq!(lb.health(), vec![false, false]);
        assert!(matches!(pick(&lb).await, Err(BalancerError::Closed)));
    }
}
