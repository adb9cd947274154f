//! Owner-scoped exclusivity for batch passes
//!
//! Consolidation and lifecycle passes read then write sets of memories, so
//! only one of them may run per owner at a time. Reads and single-memory
//! writes never take these locks.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// One advisory mutex per owner, created on first use
#[derive(Debug, Default, Clone)]
pub struct OwnerLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, owner_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(owner_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` while holding the owner's lock. The owner's entry is dropped
    /// again once no other pass holds or waits on it.
    pub fn with_owner<F, T>(&self, owner_id: &str, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let lock = self.lock_for(owner_id);
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        self.locks
            .remove_if(owner_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }
}
