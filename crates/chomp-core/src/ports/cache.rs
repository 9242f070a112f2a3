//! Cache Store port (component D).
//!
//! A namespaced key → value store with optional per-key TTL. Used for
//! inter-ingester data exchange (`chomp:<ingesterName>` snapshots), for the
//! Distributed Claim Lock's `claim:<name>:<epoch>` records, and for EVM
//! logger block-cursor bookkeeping (`chomp:lastblock:<chainId>:<addr>`).
//!
//! Values are opaque bytes; callers that need structured values serialize
//! with `serde_json` before `set` and deserialize after `get`. This mirrors
//! `ghostnet_indexer::ports::Cache`'s split between the trait (storage
//! mechanics) and typed helpers built on top of it.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Aggregate cache statistics, exposed for observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of `get` calls that found a live value.
    pub hits: u64,
    /// Number of `get` calls that found nothing (or an expired entry).
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of `get` calls that were hits, in `[0.0, 1.0]`. Returns `0.0`
    /// when no calls have been recorded.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Port for the Cache Store (component D).
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a value by key. Returns `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value, optionally with a TTL after which it expires.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Atomically store a value only if the key is currently absent.
    ///
    /// Returns `true` if this call won (the value was written), `false` if
    /// the key was already present. This is the Distributed Claim Lock's
    /// sole synchronization primitive.
    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
    -> Result<bool>;

    /// Remove a key. A no-op if the key is absent.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Current hit/miss statistics.
    async fn stats(&self) -> CacheStats;
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEST MOCKS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks {
    //! In-memory [`Cache`] test double with no TTL enforcement beyond a
    //! recorded expiry instant, for deterministic unit tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{Duration, Instant};

    use parking_lot::RwLock;

    use super::{Cache, CacheStats};
    use crate::error::Result;
    use async_trait::async_trait;

    struct Entry {
        value: Vec<u8>,
        expires_at: Option<Instant>,
    }

    /// In-memory mock implementing [`Cache`], suitable for unit and
    /// scheduler tests that need a real `set_if_absent` race.
    #[derive(Debug, Default)]
    pub struct MockCache {
        entries: RwLock<HashMap<String, Entry>>,
        hits: AtomicU64,
        misses: AtomicU64,
    }

    impl MockCache {
        /// Create an empty mock cache.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn is_live(entry: &Entry) -> bool {
            entry.expires_at.is_none_or(|at| at > Instant::now())
        }
    }

    #[async_trait]
    impl Cache for MockCache {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(key) {
                if Self::is_live(entry) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.value.clone()));
                }
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
            self.entries.write().insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at: ttl.map(|d| Instant::now() + d),
                },
            );
            Ok(())
        }

        async fn set_if_absent(
            &self,
            key: &str,
            value: Vec<u8>,
            ttl: Option<Duration>,
        ) -> Result<bool> {
            let mut entries = self.entries.write();
            if let Some(existing) = entries.get(key) {
                if Self::is_live(existing) {
                    return Ok(false);
                }
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at: ttl.map(|d| Instant::now() + d),
                },
            );
            Ok(true)
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.entries.write().remove(key);
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
            let cache = MockCache::new();
            cache.set("k", b"v".to_vec(), None).await.unwrap();
            assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        }

        #[tokio::test]
        async fn set_if_absent_only_one_winner() {
            let cache = MockCache::new();
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
        async fn expired_entry_is_absent() {
            let cache = MockCache::new();
            cache
                .set("k", b"v".to_vec(), Some(Duration::from_millis(1)))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(cache.get("k").await.unwrap(), None);
        }

        #[tokio::test]
        async fn delete_removes_key() {
            let cache = MockCache::new();
            cache.set("k", b"v".to_vec(), None).await.unwrap();
            cache.delete("k").await.unwrap();
            assert_eq!(cache.get("k").await.unwrap(), None);
        }
    }
}
