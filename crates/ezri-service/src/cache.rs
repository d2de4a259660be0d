//! Time-bounded in-process caches.
//!
//! Each cache is an explicit value owned by [`AppState`](crate::AppState)
//! and reads time from the injected [`Clock`], so freshness is testable and
//! nothing lives in a process-global.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use ezri_core::Clock;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    stored_at: DateTime<Utc>,
}

/// A map whose entries expire `ttl` after insertion.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Create an empty cache.
    #[must_use]
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The cached value for `key`, if present and fresh.
    pub async fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| now - entry.stored_at < self.ttl)
            .map(|entry| entry.value.clone())
    }

    /// Store `value` under `key`.
    pub async fn insert(&self, key: K, value: V) {
        let entry = Entry {
            value,
            stored_at: self.clock.now(),
        };
        let mut entries = self.entries.write().await;
        let now = entry.stored_at;
        entries.retain(|_, e| now - e.stored_at < self.ttl);
        entries.insert(key, entry);
    }

    /// Drop the entry for `key`.
    pub async fn invalidate(&self, key: &K) {
        self.entries.write().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ezri_core::ManualClock;

    fn cache(ttl_secs: i64) -> (TtlCache<&'static str, i32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let cache = TtlCache::new(Duration::seconds(ttl_secs), clock.clone() as Arc<dyn Clock>);
        (cache, clock)
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let (cache, clock) = cache(30);
        cache.insert("a", 1).await;

        clock.advance(Duration::seconds(29));
        assert_eq!(cache.get(&"a").await, Some(1));

        clock.advance(Duration::seconds(1));
        assert_eq!(cache.get(&"a").await, None);
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let (cache, _clock) = cache(30);
        cache.insert("a", 1).await;
        cache.invalidate(&"a").await;
        assert_eq!(cache.get(&"a").await, None);
    }

    #[tokio::test]
    async fn insert_evicts_stale_entries() {
        let (cache, clock) = cache(10);
        cache.insert("old", 1).await;
        clock.advance(Duration::seconds(11));
        cache.insert("new", 2).await;
        assert_eq!(cache.entries.read().await.len(), 1);
    }
}
