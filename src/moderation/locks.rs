//! Per-key async locks.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per key, created on demand and dropped when unused.
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Held while a key is locked.
pub struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        // Clone the Arc out so the shard lock is not held across the await.
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        KeyGuard {
            owner: self,
            key: key.to_string(),
            guard: Some(mutex.lock_owned().await),
        }
    }

    /// Number of keys with a live mutex.
    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // The map's own reference is the only one left when nobody waits.
        self.owner
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
