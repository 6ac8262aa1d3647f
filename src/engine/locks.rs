//! Per-deal mutual exclusion.
//!
//! Event ingestion and reconciliation both read-modify-write the same
//! deal aggregate and may run concurrently. Every multi-step mutation
//! for a deal acquires that deal's async lock first; the registry map
//! itself is guarded by a cheap synchronous mutex.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::DealId;

/// Registry of per-deal async locks.
#[derive(Default)]
pub struct DealLocks {
    locks: Mutex<HashMap<DealId, Arc<AsyncMutex<()>>>>,
}

impl DealLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for one deal, creating it on first use.
    pub async fn acquire(&self, deal_id: &DealId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(
                locks
                    .entry(deal_id.clone())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// Drop a terminal deal's lock entry. Holders keep their guard; new
    /// acquisitions for the same deal create a fresh lock.
    pub fn forget(&self, deal_id: &DealId) {
        self.locks.lock().remove(deal_id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}
