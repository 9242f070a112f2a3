//! In-process observability counters (ambient stack, §10).
//!
//! Backend-agnostic: a real deployment would bridge these to
//! `metrics`/Prometheus, which is a non-goal here, but the counters
//! themselves are in-scope ambient observability. Generalized from
//! `fleet_core::metrics::FleetMetrics`, trading "actions by plugin/wallet"
//! for "ticks/claims/decodes by ingester".

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Ring buffer capacity for recent tick durations, used for percentile
/// computation.
const RECENT_DURATIONS_CAPACITY: usize = 1000;

/// Outcome of one ingester tick, recorded via [`FleetMetrics::record_tick`].
#[derive(Debug, Clone)]
pub struct TickOutcome {
    /// Ingester name.
    pub ingester: String,
    /// Whether this instance won the claim lock for this tick.
    pub claimed: bool,
    /// Whether the tick completed successfully (only meaningful if
    /// `claimed`).
    pub success: bool,
    /// Wall-clock duration of the tick body, in milliseconds.
    pub duration_ms: u64,
    /// Number of per-datum decode errors encountered this tick.
    pub decode_errors: u64,
}

/// Point-in-time snapshot of fleet-wide metrics.
#[derive(Debug, Clone, Default)]
pub struct FleetSnapshot {
    /// Total ticks fired (claim attempted), across all ingesters.
    pub ticks_fired: u64,
    /// Ticks this instance won the claim for.
    pub claims_won: u64,
    /// Ticks another instance won (or the cache was unavailable).
    pub claims_lost: u64,
    /// Ticks that completed successfully.
    pub ticks_succeeded: u64,
    /// Ticks that failed (handler error, timeout, storage error, ...).
    pub ticks_failed: u64,
    /// Total per-datum decode errors.
    pub decode_errors: u64,
    /// Ticks fired by ingester name.
    pub ticks_by_ingester: HashMap<String, u64>,
    /// p50 tick duration in milliseconds.
    pub p50_duration_ms: u64,
    /// p95 tick duration in milliseconds.
    pub p95_duration_ms: u64,
    /// p99 tick duration in milliseconds.
    pub p99_duration_ms: u64,
}

/// In-memory metrics collector for the ingestion fleet.
#[derive(Debug, Default)]
pub struct FleetMetrics {
    ticks_fired: AtomicU64,
    claims_won: AtomicU64,
    claims_lost: AtomicU64,
    ticks_succeeded: AtomicU64,
    ticks_failed: AtomicU64,
    decode_errors: AtomicU64,
    by_ingester: Mutex<HashMap<String, u64>>,
    recent_durations: Mutex<Vec<u64>>,
}

impl FleetMetrics {
    /// Create an empty metrics collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a claim attempt and its outcome. Call once per ingester per
    /// tick epoch, whether or not this instance won the claim.
    pub fn record_claim(&self, ingester: &str, won: bool) {
        self.ticks_fired.fetch_add(1, Ordering::Relaxed);
        if won {
            self.claims_won.fetch_add(1, Ordering::Relaxed);
        } else {
            self.claims_lost.fetch_add(1, Ordering::Relaxed);
        }
        *self
            .by_ingester
            .lock()
            .entry(ingester.to_string())
            .or_insert(0) += 1;
    }

    /// Record the outcome of an executed tick (only call this when the
    /// claim was won and the body actually ran).
    pub fn record_tick(&self, outcome: &TickOutcome) {
        if outcome.success {
            self.ticks_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.ticks_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.decode_errors
            .fetch_add(outcome.decode_errors, Ordering::Relaxed);

        let mut durations = self.recent_durations.lock();
        if durations.len() >= RECENT_DURATIONS_CAPACITY {
            durations.remove(0);
        }
        durations.push(outcome.duration_ms);
    }

    /// Take a consistent snapshot of current metrics.
    #[must_use]
    pub fn snapshot(&self) -> FleetSnapshot {
        let durations = self.recent_durations.lock();
        FleetSnapshot {
            ticks_fired: self.ticks_fired.load(Ordering::Relaxed),
            claims_won: self.claims_won.load(Ordering::Relaxed),
            claims_lost: self.claims_lost.load(Ordering::Relaxed),
            ticks_succeeded: self.ticks_succeeded.load(Ordering::Relaxed),
            ticks_failed: self.ticks_failed.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            ticks_by_ingester: self.by_ingester.lock().clone(),
            p50_duration_ms: percentile(&durations, 50),
            p95_duration_ms: percentile(&durations, 95),
            p99_duration_ms: percentile(&durations, 99),
        }
    }
}

/// Compute the `p`-th percentile (0-100) of `data`, which need not be
/// sorted. Returns `0` for empty input.
#[must_use]
pub fn percentile(data: &[u64], p: u8) -> u64 {
    if data.is_empty() {
        return 0;
    }
    let mut sorted = data.to_vec();
    sorted.sort_unstable();
    let rank = (f64::from(p) / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_empty_is_zero() {
        assert_eq!(percentile(&[], 50), 0);
    }

    #[test]
    fn percentile_single_value() {
        assert_eq!(percentile(&[42], 99), 42);
    }

    #[test]
    fn percentile_sorted_range() {
        let data: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&data, 50), 50);
        assert_eq!(percentile(&data, 99), 99);
    }

    #[test]
    fn record_claim_and_tick_snapshot() {
        let metrics = FleetMetrics::new();
        metrics.record_claim("feed", true);
        metrics.record_claim("feed", false);
        metrics.record_tick(&TickOutcome {
            ingester: "feed".to_string(),
            claimed: true,
            success: true,
            duration_ms: 10,
            decode_errors: 1,
        });

        let snap = metrics.snapshot();
        assert_eq!(snap.ticks_fired, 2);
        assert_eq!(snap.claims_won, 1);
        assert_eq!(snap.claims_lost, 1);
        assert_eq!(snap.ticks_succeeded, 1);
        assert_eq!(snap.decode_errors, 1);
        assert_eq!(snap.ticks_by_ingester.get("feed"), Some(&2));
    }
}
