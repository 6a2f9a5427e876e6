// ── Per-key mutual exclusion ──
//
// Serializes work on one interface or one device while letting
// different keys proceed concurrently. Locks are created on first use
// and kept for the life of the owner; the key space is small (tunnel
// interfaces, enabled devices).

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub(crate) async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the DashMap shard is not held across the await.
        let mutex = Arc::clone(
            self.locks
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        mutex.lock_owned().await
    }
}
