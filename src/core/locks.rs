//! Per-initiative single-writer discipline.
//!
//! Writes to one initiative (content + sidecar pairs, journal appends and
//! journal rewrites) are serialized; writes to different initiatives proceed
//! in parallel. Reads never take these locks.

use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct InitiativeLocks {
    slots: Mutex<FxHashMap<String, Arc<Mutex<()>>>>,
}

impl InitiativeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, initiative_id: &str) -> Arc<Mutex<()>> {
        // A poisoned registry only means another writer panicked; the map
        // itself is still consistent.
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(initiative_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs `f` while holding the initiative's write lock.
    pub fn with_lock<F, R>(&self, initiative_id: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let slot = self.slot(initiative_id);
        let _guard = slot.lock().unwrap_or_else(|e| e.into_inner());
        f()
    }

    /// Number of initiatives that have been locked at least once.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
