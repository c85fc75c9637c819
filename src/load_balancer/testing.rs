//! In-memory connector for unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::load_balancer::session::{Connector, Session};
use crate::load_balancer::types::BoxError;
use crate::net::Endpoint;

#[derive(Default)]
struct FakeState {
    unreachable: Mutex<HashSet<String>>,
    probe_fail: Mutex<HashSet<String>>,
    probe_delay: Mutex<HashMap<String, Duration>>,
    connect_delay: Mutex<HashMap<String, Duration>>,
    connects: AtomicUsize,
    /// Sessions opened by `connect` and not yet closed.
    live: AtomicUsize,
    probes: AtomicUsize,
}

/// Connector whose behavior is scripted per host.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<FakeState>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, host: &str, reachable: bool) {
        let mut set = self.state.unreachable.lock().unwrap();
        if reachable {
            set.remove(host);
        } else {
            set.insert(host.to_string());
        }
    }

    pub fn set_probe_ok(&self, host: &str, ok: bool) {
        let mut set = self.state.probe_fail.lock().unwrap();
        if ok {
            set.remove(host);
        } else {
            set.insert(host.to_string());
        }
    }

    pub fn set_probe_delay(&self, host: &str, delay: Duration) {
        self.state.probe_delay.lock().unwrap().insert(host.to_string(), delay);
    }

    pub fn set_connect_delay(&self, host: &str, delay: Duration) {
        self.state.connect_delay.lock().unwrap().insert(host.to_string(), delay);
    }

    /// A session for `host` that does not count as a connect.
    pub fn session_for(&self, host: &str) -> FakeSession {
        FakeSession {
            host: host.to_string(),
            closed: AtomicBool::new(false),
            tracked: false,
            state: self.state.clone(),
        }
    }

    /// Connected sessions that have not been closed.
    pub fn live_sessions(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> usize {
        self.state.probes.load(Ordering::SeqCst)
    }
}

pub struct FakeSession {
    pub host: String,
    closed: AtomicBool,
    tracked: bool,
    state: Arc<FakeState>,
}

#[async_trait]
impl Session for FakeSession {
    async fn probe(&self) -> Result<(), BoxError> {
        self.state.probes.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.probe_delay.lock().unwrap().get(&self.host).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.is_closed() {
            return Err("session closed".into());
        }
        if self.state.probe_fail.lock().unwrap().contains(&self.host) {
            return Err(format!("{} probe failed", self.host).into());
        }
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) && self.tracked {
            self.state.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn connect(&self, endpoint: &Endpoint, _traversal_source: &str) -> Result<FakeSession, BoxError> {
        let delay = self.state.connect_delay.lock().unwrap().get(endpoint.host()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.unreachable.lock().unwrap().contains(endpoint.host()) {
            return Err(format!("connection refused: {}", endpoint).into());
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state.live.fetch_add(1, Ordering::SeqCst);
        let mut session = self.session_for(endpoint.host());
        session.tracked = true;
        Ok(session)
    }
}
