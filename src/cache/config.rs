//! Cache sizing and expiry.

use std::time::Duration;

/// Sizing and expiry of one cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_capacity: u64,
    /// Evict entries this long after insertion.
    pub ttl: Option<Duration>,
    /// Evict entries not read for this long.
    pub tti: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::with_capacity(1_000)
    }
}

impl CacheConfig {
    /// Bounded cache without expiry.
    pub fn with_capacity(max_capacity: u64) -> Self {
        Self {
            max_capacity,
            ttl: None,
            tti: None,
        }
    }

    #[must_use]
    pub fn ttl(self, ttl: Duration) -> Self {
        Self { ttl: Some(ttl), ..self }
    }

    #[must_use]
    pub fn tti(self, tti: Duration) -> Self {
        Self { tti: Some(tti), ..self }
    }

    /// Group metadata. Read on every group message; roles change rarely and
    /// removals invalidate the entry themselves, so a minute is plenty.
    pub fn chat_metadata() -> Self {
        Self::with_capacity(500)
            .ttl(Duration::from_secs(60))
            .tti(Duration::from_secs(30))
    }
}
