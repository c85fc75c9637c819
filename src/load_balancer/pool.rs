//! Backend pool.
//!
//! # Responsibilities
//! - Own the ordered sequence of backends
//! - Serialize structural changes (add, remove, session replacement)
//! - Select the next healthy backend for a dispatch
//!
//! # Locking
//! One `RwLock` guards the sequence. Writers: add, remove, session
//! install/discard, drain. Readers: selection snapshots and introspection.
//! Health flags live on each backend and are read without the write lock.
//! Once drained the pool is sealed: inserts and session installs are refused.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::load_balancer::{
    backend::Backend,
    round_robin::RoundRobin,
    types::{BalancerError, BalancerResult},
};
use crate::net::Endpoint;

/// Ordered collection of backends plus the shared rotation counter.
pub struct BackendPool<S> {
    backends: RwLock<Vec<Arc<Backend<S>>>>,
    selector: RoundRobin,
    /// Set under the write lock by `drain_sessions`.
    sealed: AtomicBool,
}

/// Why `BackendPool::insert` handed a backend back.
#[derive(Debug)]
pub enum InsertRejected<S> {
    /// The endpoint is already registered.
    Duplicate(Backend<S>),
    /// The pool has been drained.
    Sealed(Backend<S>),
}

impl<S> InsertRejected<S> {
    pub fn into_backend(self) -> Backend<S> {
        match self {
            InsertRejected::Duplicate(backend) | InsertRejected::Sealed(backend) => backend,
        }
    }
}

impl<S> BackendPool<S> {
    pub fn new(backends: Vec<Backend<S>>) -> Self {
        Self {
            backends: RwLock::new(backends.into_iter().map(Arc::new).collect()),
            selector: RoundRobin::new(),
            sealed: AtomicBool::new(false),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Backend<S>>>> {
        self.backends.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<Backend<S>>>> {
        self.backends.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Select the next healthy backend.
    ///
    /// The returned handle stays valid even if the backend is removed from
    /// the pool afterwards.
    pub fn select_next(&self) -> BalancerResult<Arc<Backend<S>>> {
        let backends = self.read();
        let healthy: Vec<usize> = backends
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_healthy())
            .map(|(i, _)| i)
            .collect();

        match self.selector.next_index(&healthy) {
            Some(index) => Ok(backends[index].clone()),
            None => {
                tracing::debug!(backend_count = backends.len(), "No healthy backends in pool");
                Err(BalancerError::NoHealthyHosts)
            }
        }
    }

    /// Append a backend unless its endpoint is already present or the pool
    /// has been drained.
    ///
    /// A rejected backend is handed back so its session can be closed
    /// outside the lock.
    pub fn insert(&self, backend: Backend<S>) -> Result<Arc<Backend<S>>, InsertRejected<S>> {
        let mut backends = self.write();
        if self.sealed.load(Ordering::Acquire) {
            return Err(InsertRejected::Sealed(backend));
        }
        if backends.iter().any(|b| b.endpoint == backend.endpoint) {
            return Err(InsertRejected::Duplicate(backend));
        }
        let backend = Arc::new(backend);
        backends.push(backend.clone());
        Ok(backend)
    }

    /// Remove a backend by endpoint, detaching its session.
    pub fn remove(&self, endpoint: &Endpoint) -> Option<(Arc<Backend<S>>, Option<Arc<S>>)> {
        let mut backends = self.write();
        let index = backends.iter().position(|b| &b.endpoint == endpoint)?;
        let backend = backends.remove(index);
        let session = backend.take_session();
        Some((backend, session))
    }

    /// Install a freshly opened session on `backend`.
    ///
    /// Fails (handing the session back) if the backend has been removed
    /// from the pool, already holds a session, or the pool is drained.
    pub fn install_session(&self, backend: &Arc<Backend<S>>, session: Arc<S>) -> Result<Arc<S>, Arc<S>> {
        let backends = self.write();
        if self.sealed.load(Ordering::Acquire)
            || !backends.iter().any(|b| Arc::ptr_eq(b, backend))
            || backend.has_session()
        {
            return Err(session);
        }
        backend.install_session(session.clone());
        Ok(session)
    }

    /// Drop `session` from `backend` if it is still the installed one.
    pub fn discard_session(&self, backend: &Arc<Backend<S>>, session: &Arc<S>) -> bool {
        let _backends = self.write();
        match backend.session() {
            Some(current) if Arc::ptr_eq(&current, session) => {
                backend.take_session();
                true
            }
            _ => false,
        }
    }

    /// Return `backend` to rotation if it is still a member.
    ///
    /// Holding the read lock keeps a concurrent session discard from
    /// interleaving between the session check and the flag flip.
    pub fn promote(&self, backend: &Arc<Backend<S>>) -> bool {
        let backends = self.read();
        backends.iter().any(|b| Arc::ptr_eq(b, backend)) && backend.mark_up()
    }

    /// Detach every session, mark every backend down and seal the pool.
    pub fn drain_sessions(&self) -> Vec<Arc<S>> {
        let backends = self.write();
        self.sealed.store(true, Ordering::Release);
        backends.iter().filter_map(|b| b.take_session()).collect()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.read().iter().any(|b| &b.endpoint == endpoint)
    }

    /// Backends currently out of rotation.
    pub fn unhealthy(&self) -> Vec<Arc<Backend<S>>> {
        self.read().iter().filter(|b| !b.is_healthy()).cloned().collect()
    }

    /// All backends in pool order.
    pub fn all_backends(&self) -> Vec<Arc<Backend<S>>> {
        self.read().clone()
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.read().iter().map(|b| b.endpoint.clone()).collect()
    }

    /// Health flags aligned with `endpoints()`.
    pub fn health(&self) -> Vec<bool> {
        self.read().iter().map(|b| b.is_healthy()).collect()
    }

    pub fn healthy_count(&self) -> usize {
        self.read().iter().filter(|b| b.is_healthy()).count()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
