//! Backend entry.
//!
//! # Responsibilities
//! - Represent a single configured backend
//! - Hold its live session handle (if any)
//! - Track health as a lock-free flag
//!
//! # Invariant
//! `healthy` is false whenever `session` is absent. A present session does
//! not imply healthy: it may be stale until probed.

use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::net::Endpoint;

/// Health state derived from the entry's flag and session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// In rotation.
    Healthy,
    /// Out of rotation, session open but not yet probed back.
    Stale,
    /// Out of rotation, no session.
    Disconnected,
}

/// A single backend and its session.
pub struct Backend<S> {
    /// Normalized address; unique within a pool.
    pub endpoint: Endpoint,
    /// Live session. Replaced only while the pool's structural lock is held.
    session: ArcSwapOption<S>,
    healthy: AtomicBool,
}

impl<S> Backend<S> {
    /// Create a backend. It starts healthy exactly when a session is present.
    pub fn new(endpoint: Endpoint, session: Option<S>) -> Self {
        let healthy = session.is_some();
        Self {
            endpoint,
            session: ArcSwapOption::new(session.map(Arc::new)),
            healthy: AtomicBool::new(healthy),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Current session handle, if one is open.
    pub fn session(&self) -> Option<Arc<S>> {
        self.session.load_full()
    }

    pub fn has_session(&self) -> bool {
        self.session.load().is_some()
    }

    pub fn state(&self) -> HealthState {
        if self.is_healthy() {
            HealthState::Healthy
        } else if self.has_session() {
            HealthState::Stale
        } else {
            HealthState::Disconnected
        }
    }

    /// Take the backend out of rotation.
    ///
    /// Returns true if this call performed the Healthy → Down transition.
    pub fn mark_down(&self) -> bool {
        self.healthy.swap(false, Ordering::AcqRel)
    }

    /// Put the backend back into rotation.
    ///
    /// Refused (returns false) when no session is present. Returns true only
    /// if this call performed the Down → Healthy transition.
    pub(crate) fn mark_up(&self) -> bool {
        if !self.has_session() {
            return false;
        }
        !self.healthy.swap(true, Ordering::AcqRel)
    }

    /// Install a session. Caller must hold the pool's structural lock.
    pub(crate) fn install_session(&self, session: Arc<S>) {
        self.session.store(Some(session));
    }

    /// Remove the session, taking the backend out of rotation first.
    /// Caller must hold the pool's structural lock.
    pub(crate) fn take_session(&self) -> Option<Arc<S>> {
        self.healthy.store(false, Ordering::Release);
        self.session.swap(None)
    }
}

impl<S> std::fmt::Debug for Backend<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("endpoint", &self.endpoint.as_str())
            .field("state", &self.state())
            .finish()
    }
}
