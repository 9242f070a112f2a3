//! Distributed Claim Lock (component B).
//!
//! Elects at most one executor per `(ingester, tick epoch)` across the
//! fleet, atop the Cache Store's `set_if_absent` primitive. No explicit
//! unlock path exists: the claim record's TTL (equal to the interval)
//! guarantees eventual release even if the holder crashes, and losing a
//! tick is cheap — the scheduler simply skips it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{instrument, warn};

use crate::error::{ChompError, Result};
use crate::ports::Cache;

/// Key namespace for claim records, per §3's `claim:<name>:<epoch>`.
fn claim_key(ingester: &str, epoch: i64) -> String {
    format!("chomp:claim:{ingester}:{epoch}")
}

/// The Distributed Claim Lock.
///
/// Holds the cache as a trait object so the Scheduler can wire it up
/// alongside the other ports without threading a generic parameter
/// through every layer above it; tests swap in
/// [`crate::ports::MockCache`] (or, for cache-outage tests, a cache
/// wired to always error).
#[derive(Debug)]
pub struct ClaimLock {
    cache: Arc<dyn Cache>,
    /// `true` if this instance runs without a fleet (single process). A
    /// stand-alone runner always wins its own claim even if the cache
    /// backend is unreachable, per §4.B's failure mode.
    stand_alone: bool,
}

impl ClaimLock {
    /// Construct a claim lock backed by `cache`. `stand_alone` should be
    /// `true` only for single-instance deployments that tolerate the
    /// cache being unavailable.
    pub fn new(cache: Arc<dyn Cache>, stand_alone: bool) -> Self {
        Self { cache, stand_alone }
    }

    /// Attempt to claim `(name, epoch)` for `instance_uid`, with the claim
    /// record expiring after `ttl`.
    ///
    /// Returns `Ok(true)` if this call won the claim (the caller should
    /// execute the ingester body), `Ok(false)` if another instance already
    /// holds it (the caller should skip this tick silently).
    #[instrument(skip(self, instance_uid), fields(ingester = name, epoch))]
    pub async fn try_claim(
        &self,
        name: &str,
        epoch: i64,
        instance_uid: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let key = claim_key(name, epoch);
        match self
            .cache
            .set_if_absent(&key, instance_uid.as_bytes().to_vec(), Some(ttl))
            .await
        {
            Ok(won) => Ok(won),
            Err(err) if self.stand_alone => {
                warn!(
                    ingester = name,
                    epoch,
                    error = %err,
                    "claim backend unavailable, proceeding as stand-alone runner"
                );
                Ok(true)
            }
            Err(err) => {
                warn!(ingester = name, epoch, error = %err, "claim backend unavailable");
                Err(ChompError::ClaimBackendUnavailable {
                    ingester: name.to_string(),
                    epoch,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::MockCache;

    #[tokio::test]
    async fn first_claim_wins_second_loses() {
        let lock = ClaimLock::new(Arc::new(MockCache::new()), false);
        assert!(
            lock.try_claim("feed", 42, "proc-a", Duration::from_secs(30))
                .await
                .unwrap()
        );
        assert!(
            !lock
                .try_claim("feed", 42, "proc-b", Duration::from_secs(30))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn distinct_epochs_both_claimable() {
        let lock = ClaimLock::new(Arc::new(MockCache::new()), false);
        assert!(
            lock.try_claim("feed", 1, "proc-a", Duration::from_secs(30))
                .await
                .unwrap()
        );
        assert!(
            lock.try_claim("feed", 2, "proc-a", Duration::from_secs(30))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn distinct_ingesters_dont_collide() {
        let lock = ClaimLock::new(Arc::new(MockCache::new()), false);
        assert!(
            lock.try_claim("feed-a", 1, "proc-a", Duration::from_secs(30))
                .await
                .unwrap()
        );
        assert!(
            lock.try_claim("feed-b", 1, "proc-a", Duration::from_secs(30))
                .await
                .unwrap()
        );
    }
}
