//! Named Moka cache with hit/miss counters.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use moka::sync::Cache;
use tracing::trace;

use super::CacheConfig;

/// Hit and miss counts since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} hits / {} misses", self.hits, self.misses)
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// A Moka cache with a name (for logs) and usage counters.
///
/// Clones share entries and counters.
pub struct TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<K, V>,
    name: Arc<str>,
    counters: Arc<Counters>,
}

// Manual Clone implementation that doesn't require K: Clone
impl<K, V> Clone for TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            name: Arc::clone(&self.name),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<K, V> TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<Arc<str>>, config: CacheConfig) -> Self {
        let builder = Cache::builder().max_capacity(config.max_capacity);
        let builder = match config.ttl {
            Some(ttl) => builder.time_to_live(ttl),
            None => builder,
        };
        let builder = match config.tti {
            Some(tti) => builder.time_to_idle(tti),
            None => builder,
        };

        Self {
            inner: builder.build(),
            name: name.into(),
            counters: Arc::default(),
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.inner.insert(key, value);
    }

    /// Live entry for `key`, counting the lookup as a hit or a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let value = self.inner.get(key);
        let counter = if value.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        trace!("{} cache {}", self.name, if value.is_some() { "hit" } else { "miss" });
        value
    }

    pub fn invalidate(&self, key: &K) {
        self.inner.invalidate(key);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> fmt::Debug for TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedCache")
            .field("name", &self.name)
            .field("entries", &self.inner.entry_count())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookups_are_counted() {
        let cache: TypedCache<String, u32> = TypedCache::new("test", CacheConfig::default());
        assert_eq!(cache.get(&"a".to_string()), None);

        cache.insert("a".into(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        let shared = cache.clone();
        shared.invalidate(&"a".to_string());
        assert_eq!(cache.get(&"a".to_string()), None);

        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 2 });
    }
}
