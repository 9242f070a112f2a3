//! Scheduler (component F).
//!
//! Grounded on `ghost_fleet::service::FleetService::run`'s tick-based
//! `tokio::time::interval` main loop: `loop { tick.tick().await; ...
//! collect due items; for each due item, act, log-and-continue on error
//! }`. The teacher's loop awaits each due wallet in sequence with no
//! worker pool or distributed lock, since a wallet fleet runs from a
//! single process. An ingestion fleet is explicitly multi-process (§1),
//! so this generalizes the loop with two things the teacher doesn't
//! need: a [`crate::claim::ClaimLock`] check per due ingester before
//! running its body, and a `tokio::sync::Semaphore`-bounded spawn so one
//! slow ingester can't starve the others (§9's worker-pool design note).
//!
//! §9 also calls for replacing ad hoc global mutable state with an
//! explicit context object threaded through the scheduler; that's
//! [`RuntimeContext`] here.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, Semaphore};
use tokio::time::interval;
use tracing::{debug, error, instrument, warn};

use crate::claim::ClaimLock;
use crate::error::Result;
use crate::interval as interval_registry;
use crate::metrics::{FleetMetrics, TickOutcome};
use crate::model::IngesterDef;
use crate::ports::Clock;

/// A registered ingester's executable body: an async closure run once
/// per won tick, given the shared [`RuntimeContext`] and the ingester's
/// own definition. Boxed so the Scheduler can hold a heterogeneous set
/// of adapter-specific closures (HTTP poll, EVM log fetch, processor
/// dependency gather, ...) behind one type.
pub type IngesterBody = Arc<
    dyn Fn(Arc<RuntimeContext>, Arc<IngesterDef>) -> futures::future::BoxFuture<'static, Result<()>>
        + Send
        + Sync,
>;

/// Shared, explicit runtime state threaded through every scheduled tick,
/// replacing ad hoc global mutable state per §9's design note.
pub struct RuntimeContext {
    /// Cache Store handle, shared by the claim lock, field snapshot
    /// caching, and block-cursor bookkeeping.
    pub cache: Arc<dyn crate::ports::Cache>,
    /// Distributed claim lock.
    pub claim: Arc<ClaimLock>,
    /// Clock, for tick-epoch alignment and timestamping records.
    pub clock: Arc<dyn Clock>,
    /// Fleet-wide metrics collector.
    pub metrics: Arc<FleetMetrics>,
    /// This process's stable identity, used as the claim-lock owner
    /// token (§6's `--proc_id`).
    pub instance_uid: String,
    /// Maximum retry attempts for a transient per-tick failure.
    pub max_retries: u32,
    /// Maximum wall-clock time a single tick's body may run before being
    /// cancelled.
    pub ingestion_timeout: Duration,
}

struct Registration {
    def: Arc<IngesterDef>,
    interval_sec: i64,
    next_fire_at: AtomicI64,
    running: Arc<AtomicBool>,
    body: IngesterBody,
}

/// Schedules and drives every registered ingester's ticks, per component
/// F.
pub struct Scheduler {
    context: Arc<RuntimeContext>,
    registrations: RwLock<HashMap<String, Registration>>,
    worker_pool: Arc<Semaphore>,
}

impl Scheduler {
    /// Construct a scheduler bound to `context`, with at most
    /// `worker_pool_size` ingester ticks running concurrently.
    #[must_use]
    pub fn new(context: Arc<RuntimeContext>, worker_pool_size: usize) -> Self {
        Self {
            context,
            registrations: RwLock::new(HashMap::new()),
            worker_pool: Arc::new(Semaphore::new(worker_pool_size.max(1))),
        }
    }

    /// Register an ingester with its executable body. Registering a name
    /// that already exists replaces it (its `next_fire_at` is
    /// recomputed).
    ///
    /// # Errors
    /// Propagates [`interval_registry::parse`]'s errors for a malformed
    /// interval spec.
    pub async fn register(&self, def: IngesterDef, body: IngesterBody) -> Result<()> {
        let interval_sec = interval_registry::parse(&def.interval)?;
        let now = self.context.clock.timestamp();
        let next_fire_at = interval_registry::tick_epoch(now, interval_sec) * interval_sec + interval_sec;

        let registration = Registration {
            def: Arc::new(def.clone()),
            interval_sec,
            next_fire_at: AtomicI64::new(next_fire_at),
            running: Arc::new(AtomicBool::new(false)),
            body,
        };
        self.registrations.write().await.insert(def.name.clone(), registration);
        Ok(())
    }

    /// Number of currently registered ingesters.
    pub async fn len(&self) -> usize {
        self.registrations.read().await.len()
    }

    /// Run the scheduler's main loop. Runs until cancelled (e.g. the
    /// enclosing task is dropped); never returns `Err` under normal
    /// operation since per-tick failures are logged and retried on a
    /// later epoch, matching the teacher's "log and continue" loop body.
    pub async fn run(self: Arc<Self>, tick_interval: Duration) -> Result<()> {
        let mut tick = interval(tick_interval);

        debug!(tick_ms = tick_interval.as_millis() as u64, "starting scheduler main loop");

        loop {
            tick.tick().await;
            self.fire_due_ingesters().await;
        }
    }

    async fn fire_due_ingesters(&self) {
        let now = self.context.clock.timestamp();
        let due: Vec<(String, i64, Arc<IngesterDef>, Arc<AtomicBool>, IngesterBody)> = {
            let registrations = self.registrations.read().await;
            registrations
                .iter()
                .filter_map(|(name, reg)| {
                    let fire_at = reg.next_fire_at.load(Ordering::SeqCst);
                    if fire_at > now {
                        return None;
                    }
                    Some((
                        name.clone(),
                        reg.interval_sec,
                        Arc::clone(&reg.def),
                        Arc::clone(&reg.running),
                        Arc::clone(&reg.body),
                    ))
                })
                .collect()
        };

        for (name, interval_sec, def, running, body) in due {
            // Advance this ingester's next fire time regardless of
            // outcome, so a slow or failed tick doesn't cause it to fire
            // continuously once it falls behind.
            let epoch = interval_registry::tick_epoch(now, interval_sec);
            if let Some(reg) = self.registrations.read().await.get(&name) {
                reg.next_fire_at.store((epoch + 1) * interval_sec, Ordering::SeqCst);
            }

            if running.load(Ordering::SeqCst) {
                warn!(ingester = %name, "skipping tick: previous run still in flight (overrun protection)");
                continue;
            }

            let Ok(permit) = Arc::clone(&self.worker_pool).try_acquire_owned() else {
                warn!(ingester = %name, "worker pool exhausted, dropping tick");
                continue;
            };

            let context = Arc::clone(&self.context);
            let instance_uid = context.instance_uid.clone();
            let ingestion_timeout = context.ingestion_timeout;

            tokio::spawn(async move {
                let _permit = permit;
                running.store(true, Ordering::SeqCst);
                run_one_tick(context, def, epoch, &instance_uid, ingestion_timeout, body).await;
                running.store(false, Ordering::SeqCst);
            });
        }
    }
}

#[instrument(skip(context, body), fields(ingester = %def.name, epoch))]
async fn run_one_tick(
    context: Arc<RuntimeContext>,
    def: Arc<IngesterDef>,
    epoch: i64,
    instance_uid: &str,
    ingestion_timeout: Duration,
    body: IngesterBody,
) {
    let claim_ttl = match interval_registry::parse(&def.interval) {
        Ok(interval_sec) => Duration::from_secs(u64::try_from(interval_sec.max(1)).unwrap_or(1)),
        Err(err) => {
            error!(ingester = %def.name, error = %err, "invalid interval, skipping tick");
            context.metrics.record_claim(&def.name, false);
            return;
        }
    };
    let claimed = match context.claim.try_claim(&def.name, epoch, instance_uid, claim_ttl).await {
        Ok(claimed) => claimed,
        Err(err) => {
            error!(ingester = %def.name, error = %err, "claim attempt failed, skipping tick");
            context.metrics.record_claim(&def.name, false);
            return;
        }
    };
    context.metrics.record_claim(&def.name, claimed);
    if !claimed {
        debug!(ingester = %def.name, "another instance holds this tick's claim, skipping");
        return;
    }

    let started = std::time::Instant::now();
    let result = tokio::time::timeout(ingestion_timeout, body(Arc::clone(&context), Arc::clone(&def))).await;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let success = match result {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            error!(ingester = %def.name, error = %err, "ingester tick failed");
            false
        }
        Err(_) => {
            error!(ingester = %def.name, elapsed_ms = duration_ms, "ingester tick timed out");
            false
        }
    };

    context.metrics.record_tick(&TickOutcome {
        ingester: def.name.clone(),
        claimed: true,
        success,
        duration_ms,
        decode_errors: 0,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::model::IngesterType;
    use crate::ports::FakeClock;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn test_context(clock: Arc<FakeClock>) -> Arc<RuntimeContext> {
        let cache: Arc<dyn crate::ports::Cache> = Arc::new(MemoryCache::new());
        Arc::new(RuntimeContext {
            claim: Arc::new(ClaimLock::new(Arc::clone(&cache), false)),
            cache,
            clock,
            metrics: Arc::new(FleetMetrics::new()),
            instance_uid: "test-proc".to_string(),
            max_retries: 3,
            ingestion_timeout: Duration::from_secs(5),
        })
    }

    fn sample_def(name: &str) -> IngesterDef {
        IngesterDef {
            name: name.to_string(),
            ingester_type: IngesterType::HttpApi,
            interval: "s1".to_string(),
            fields: vec![],
            handler: None,
        }
    }

    #[tokio::test]
    async fn register_tracks_count() {
        let clock = Arc::new(FakeClock::epoch());
        let scheduler = Scheduler::new(test_context(clock), 4);
        scheduler
            .register(sample_def("feed"), Arc::new(|_, _| async { Ok(()) }.boxed()))
            .await
            .unwrap();
        assert_eq!(scheduler.len().await, 1);
    }

    #[tokio::test]
    async fn due_ingester_runs_exactly_once_per_epoch() {
        let clock = Arc::new(FakeClock::epoch());
        let context = test_context(Arc::clone(&clock));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&context), 4));

        let call_count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&call_count);
        scheduler
            .register(
                sample_def("feed"),
                Arc::new(move |_, _| {
                    let counted = Arc::clone(&counted);
                    async move {
                        counted.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                    .boxed()
                }),
            )
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(2));
        scheduler.fire_due_ingesters().await;
        // allow the spawned tick task to run
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_yet_due_ingester_does_not_run() {
        let clock = Arc::new(FakeClock::epoch());
        let context = test_context(Arc::clone(&clock));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&context), 4));

        let call_count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&call_count);
        scheduler
            .register(
                sample_def("feed"),
                Arc::new(move |_, _| {
                    let counted = Arc::clone(&counted);
                    async move {
                        counted.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                    .boxed()
                }),
            )
            .await
            .unwrap();

        // next_fire_at is computed as the *next* boundary strictly after
        // epoch 0, so without advancing the clock nothing should fire.
        scheduler.fire_due_ingesters().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(call_count.load(Ordering::SeqCst), 0);
    }
}
