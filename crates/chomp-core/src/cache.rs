//! In-process `Cache` Store backend (component D), the default
//! implementation used by single-instance ("stand-alone") deployments and
//! by every other component's tests.
//!
//! Built on `moka::sync::Cache` with a custom [`moka::Expiry`] so a single
//! cache instance can hold entries with *different* per-key TTLs (field
//! snapshots default to `interval_sec * 2`, claim records to exactly
//! `interval_sec`) rather than the teacher's one-`MokaCache`-per-data-kind
//! layout. Atomicity for `set_if_absent` comes from moka's `entry(..)`
//! API, whose `or_insert_with` runs its initializer under a per-key lock
//! and reports via `is_fresh()` whether this call was the one that wrote
//! the value — exactly the race the Distributed Claim Lock depends on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::sync::Cache as MokaCache;

use crate::error::Result;
use crate::ports::{Cache, CacheStats};

/// Default capacity for the in-process cache. Sized generously since
/// entries are small (field snapshots, claim records, block cursors).
const DEFAULT_MAX_CAPACITY: u64 = 100_000;

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    ttl: Option<Duration>,
}

struct CacheExpiry;

impl Expiry<String, StoredValue> for CacheExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// Single-process implementation of the Cache Store port.
#[derive(Debug)]
pub struct MemoryCache {
    store: MokaCache<String, StoredValue>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Create a cache with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_CAPACITY)
    }

    /// Create a cache with a custom capacity, for tests that want eviction
    /// pressure.
    #[must_use]
    pub fn with_capacity(max_capacity: u64) -> Self {
        Self {
            store: MokaCache::builder()
                .max_capacity(max_capacity)
                .expire_after(CacheExpiry)
                .build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.store.get(key) {
            Some(stored) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(stored.bytes))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.store
            .insert(key.to_string(), StoredValue { bytes: value, ttl });
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let entry = self
            .store
            .entry(key.to_string())
            .or_insert_with(|| StoredValue { bytes: value, ttl });
        Ok(entry.is_fresh())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.invalidate(key);
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = MemoryCache::new();
        cache.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn set_if_absent_only_one_winner() {
        let cache = MemoryCache::new();
        assert!(
            cache
                .set_if_absent("k", b"a".to_vec(), None)
                .await
                .unwrap()
        );
        assert!(
            !cache
                .set_if_absent("k", b"b".to_vec(), None)
                .await
                .unwrap()
        );
        assert_eq!(cache.get("k").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn expired_entry_is_absent_and_reclaimable() {
        let cache = MemoryCache::new();
        cache
            .set("k", b"v".to_vec(), Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.store.run_pending_tasks();
        assert_eq!(cache.get("k").await.unwrap(), None);

        // a fresh set_if_absent should win again once the old entry expired
        assert!(
            cache
                .set_if_absent("k", b"c".to_vec(), None)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let cache = MemoryCache::new();
        cache.set("k", b"v".to_vec(), None).await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn stats_track_hits_and_misses() {
        let cache = MemoryCache::new();
        cache.set("k", b"v".to_vec(), None).await.unwrap();
        let _ = cache.get("k").await.unwrap();
        let _ = cache.get("missing").await.unwrap();
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
