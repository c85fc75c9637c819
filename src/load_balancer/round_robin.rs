//! Round-robin selection over the healthy subset of a pool.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin selector.
/// Stores the shared position counter used by every dispatch call.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the next index from `healthy` (pool indexes of healthy entries).
    ///
    /// The counter advances once per call, so concurrent callers never share
    /// a rotation slot for the same snapshot. The counter is never reset when
    /// the healthy set changes.
    pub fn next_index(&self, healthy: &[usize]) -> Option<usize> {
        if healthy.is_empty() {
            return None;
        }
        let position = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(healthy[position % healthy.len()])
    }

    /// Number of selections made so far.
    pub fn position(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }
}
