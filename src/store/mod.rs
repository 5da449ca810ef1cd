//! Strike store.
//!
//! Durable mapping from user id to infraction count. The whole mapping lives
//! in memory as a read-through cache over a [`StrikeBackend`]; every mutation
//! is written back before the call returns.
//!
//! ## Usage
//!
//! ```rust
//! let store = StrikeStore::open(Arc::new(JsonFileBackend::new("strikes.json")));
//!
//! let count = store.increment("5511999990000@c.us");
//! store.reset("5511999990000@c.us");
//! ```

mod backend;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

#[cfg(test)]
pub use backend::MemoryBackend;
pub use backend::{JsonFileBackend, StoreError, StrikeBackend};

/// Persisted shape: user id -> strike count.
pub type StrikeMap = BTreeMap<String, u32>;

/// Strike counts with write-through persistence.
///
/// Mutations hold the write lock while persisting, so the durable state
/// always reflects a call before the next one is accepted.
pub struct StrikeStore {
    backend: Arc<dyn StrikeBackend>,
    counts: RwLock<StrikeMap>,
}

impl StrikeStore {
    /// Open the store, loading whatever the backend has.
    ///
    /// Never fails: a missing or unreadable store starts empty.
    pub fn open(backend: Arc<dyn StrikeBackend>) -> Self {
        let counts = Self::load(backend.as_ref());
        Self {
            backend,
            counts: RwLock::new(counts),
        }
    }

    /// Read the persisted mapping, recovering to empty on any failure.
    pub fn load(backend: &dyn StrikeBackend) -> StrikeMap {
        match backend.load() {
            Ok(Some(map)) => {
                info!("Loaded {} strike records from {}", map.len(), backend.describe());
                map
            }
            Ok(None) => {
                info!("No strike store at {}, starting empty", backend.describe());
                StrikeMap::new()
            }
            Err(e) => {
                warn!("Strike store unreadable ({}), starting empty", e);
                if let Err(e) = backend.quarantine() {
                    warn!("Could not move unreadable strike store aside: {}", e);
                }
                StrikeMap::new()
            }
        }
    }

    /// Current strike count for a user (0 when absent).
    pub fn get(&self, user: &str) -> u32 {
        self.counts.read().get(user).copied().unwrap_or(0)
    }

    /// Increment a user's strikes and return the new count.
    pub fn increment(&self, user: &str) -> u32 {
        let mut counts = self.counts.write();
        let entry = counts.entry(user.to_string()).or_insert(0);
        *entry = entry.saturating_add(1);
        let count = *entry;

        self.persist(&counts);
        debug!("Strikes for {} now {}", user, count);
        count
    }

    /// Remove a user's entry. Returns whether one existed.
    pub fn reset(&self, user: &str) -> bool {
        let mut counts = self.counts.write();
        let existed = counts.remove(user).is_some();

        if existed {
            self.persist(&counts);
            debug!("Strikes for {} cleared", user);
        }
        existed
    }

    /// Copy of the current mapping.
    #[allow(dead_code)]
    pub fn snapshot(&self) -> StrikeMap {
        self.counts.read().clone()
    }

    /// Write failures leave memory authoritative; the next successful write
    /// carries the full snapshot.
    fn persist(&self, counts: &StrikeMap) {
        if let Err(e) = self.backend.persist(counts) {
            warn!("Failed to persist strikes to {}: {}", self.backend.describe(), e);
        }
    }
}

impl std::fmt::Debug for StrikeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrikeStore")
            .field("backend", &self.backend.describe())
            .field("records", &self.counts.read().len())
            .finish()
    }
}
