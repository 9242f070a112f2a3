//! Processor (component H).
//!
//! Grounded on `original_source/src/ingesters/processor.py`'s `schedule(ing)`:
//! `pre_ingest()`, then sleep half the interval *before* gathering
//! dependencies (upstream ingesters fire on wall-clock boundaries too, so
//! waiting lets their latest tick land in the cache first), then resolve the
//! handler once and reuse it for the ingester's lifetime, then invoke it (or
//! fall back to a default dot-selector projection), then `post_ingest`. A
//! handler failure drops the whole tick; per-field misses inside a
//! successful handler call do not.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use chomp_core::handler::{HandlerInputs, HandlerRegistry, ResolvedHandler};
use chomp_core::ports::Cache;
use chomp_core::scheduler::{IngesterBody, RuntimeContext};
use chomp_core::{ChompError, FieldValue, IngesterDef, Result};
use futures::FutureExt;
use tracing::warn;

use crate::ingest::{self, StorageSink};

/// Construct the Processor ingester body. `registry` is shared across every
/// processor ingester in the fleet; `handler` is resolved once (on first
/// tick) and cached for the life of the returned body, per §4.H's "Caching:
/// resolve once per ingester lifetime."
#[must_use]
pub fn body(storage: Arc<StorageSink>, registry: Arc<HandlerRegistry>) -> IngesterBody {
    let resolved: Arc<OnceLock<ResolvedHandler>> = Arc::new(OnceLock::new());
    Arc::new(move |context, def| {
        let storage = Arc::clone(&storage);
        let registry = Arc::clone(&registry);
        let resolved = Arc::clone(&resolved);
        run_tick(context, def, storage, registry, resolved).boxed()
    })
}

async fn run_tick(
    context: Arc<RuntimeContext>,
    def: Arc<IngesterDef>,
    storage: Arc<StorageSink>,
    registry: Arc<HandlerRegistry>,
    resolved: Arc<OnceLock<ResolvedHandler>>,
) -> Result<()> {
    let interval_sec = chomp_core::interval::parse(&def.interval)?;
    let fields = ingest::pre_ingest(&def);

    tokio::time::sleep(Duration::from_secs_f64(interval_sec as f64 / 2.0)).await;

    let dependencies = def.dependencies();
    let mut inputs = HandlerInputs::new();
    for upstream in &dependencies {
        match fetch_upstream_fields(context.cache.as_ref(), upstream).await {
            Ok(Some(snapshot)) => {
                inputs.insert(upstream.clone(), snapshot);
            }
            Ok(None) => {
                inputs.insert(upstream.clone(), HashMap::new());
            }
            Err(err) => {
                warn!(ingester = %def.name, upstream = %upstream, error = %err, "failed to read upstream snapshot");
                inputs.insert(upstream.clone(), HashMap::new());
            }
        }
    }

    if !dependencies.is_empty() && inputs.values().all(HashMap::is_empty) {
        warn!(ingester = %def.name, "no dependency produced any value this tick");
    }

    let results = match def.handler.as_ref() {
        Some(handler_ref) => {
            let handler = match resolved.get() {
                Some(handler) => handler,
                None => {
                    let handler = chomp_core::handler::resolve(handler_ref, &registry)
                        .map_err(|err| ChompError::handler_error(def.name.clone(), err.to_string()))?;
                    resolved.get_or_init(|| handler)
                }
            };
            handler
                .invoke(&def, &inputs)
                .map_err(|err| ChompError::handler_error(def.name.clone(), err.to_string()))?
        }
        None => default_projection(&def, &inputs),
    };

    let mut fields = fields;
    for field in &mut fields {
        if let Some(value) = results.get(&field.def.name) {
            field.value = value.clone();
        } else if field.def.selector.is_empty() {
            warn!(
                ingester = %def.name,
                field = %field.def.name,
                "MissingHandlerField: computed field absent from handler results"
            );
        }
    }

    ingest::post_ingest(&def, fields, &storage, context.clock.as_ref(), interval_sec).await
}

/// No-handler fallback, per §4.H: "else perform default projection: for
/// each field with selector `upstream.fieldName`, set `field.value =
/// inputs[upstream][fieldName]`." Fields without an `upstream.field`
/// selector (computed fields) are left absent from the result map so the
/// caller's `MissingHandlerField` warning fires for them.
fn default_projection(def: &IngesterDef, inputs: &HandlerInputs) -> HashMap<String, FieldValue> {
    let mut results = HashMap::new();
    for field in &def.fields {
        let Some((upstream, upstream_field)) = field.upstream_reference() else {
            continue;
        };
        if let Some(value) = inputs.get(upstream).and_then(|snapshot| snapshot.get(upstream_field)) {
            results.insert(field.name.clone(), value.clone());
        }
    }
    results
}

/// Read and decode the `chomp:<upstream>` cache snapshot written by
/// [`ingest::StorageSink::store`].
async fn fetch_upstream_fields(
    cache: &dyn chomp_core::ports::Cache,
    upstream: &str,
) -> Result<Option<HashMap<String, FieldValue>>> {
    let Some(bytes) = cache.get(&format!("chomp:{upstream}")).await? else {
        return Ok(None);
    };
    let snapshot: HashMap<String, FieldValue> = serde_json::from_slice(&bytes)?;
    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chomp_core::cache::MemoryCache;
    use chomp_core::claim::ClaimLock;
    use chomp_core::model::{FieldDef, FieldType, HandlerRef, IngesterType};
    use chomp_core::ports::{Cache, FakeClock, MockTimeSeriesSink};
    use chomp_core::FleetMetrics;

    fn test_context(cache: Arc<dyn Cache>) -> Arc<RuntimeContext> {
        Arc::new(RuntimeContext {
            claim: Arc::new(ClaimLock::new(Arc::clone(&cache), true)),
            cache,
            clock: Arc::new(FakeClock::epoch()),
            metrics: Arc::new(FleetMetrics::new()),
            instance_uid: "test".to_string(),
            max_retries: 1,
            ingestion_timeout: Duration::from_secs(5),
        })
    }

    fn processor_def(handler: Option<HandlerRef>, field_selector: &str) -> IngesterDef {
        IngesterDef {
            name: "combined".to_string(),
            ingester_type: IngesterType::Processor,
            interval: "s0".to_string(),
            fields: vec![FieldDef {
                name: "usd".to_string(),
                field_type: FieldType::Numeric,
                target: String::new(),
                selector: field_selector.to_string(),
                transformers: vec![],
            }],
            handler,
        }
    }

    #[tokio::test]
    async fn default_projection_copies_upstream_field() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        cache
            .set(
                "chomp:feed",
                serde_json::to_vec(&HashMap::from([("x".to_string(), FieldValue::Number(7.0))])).unwrap(),
                None,
            )
            .await
            .unwrap();

        let def = processor_def(None, "feed.x");
        let sink = Arc::new(MockTimeSeriesSink::new());
        let storage = Arc::new(StorageSink::new(Arc::clone(&cache), Arc::clone(&sink) as _));
        let context = test_context(cache);

        let ingester_body = body(storage, Arc::new(HandlerRegistry::new()));
        ingester_body(context, Arc::new(def)).await.unwrap();

        let records = sink.records();
        assert_eq!(records[0].fields.get("usd"), Some(&FieldValue::Number(7.0)));
    }

    #[tokio::test]
    async fn handler_error_drops_whole_tick() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let def = processor_def(Some(HandlerRef::Expression("1 + 1".to_string())), "");
        let sink = Arc::new(MockTimeSeriesSink::new());
        let storage = Arc::new(StorageSink::new(Arc::clone(&cache), Arc::clone(&sink) as _));
        let context = test_context(cache);

        let ingester_body = body(storage, Arc::new(HandlerRegistry::new()));
        let result = ingester_body(context, Arc::new(def)).await;

        assert!(result.is_err());
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn missing_dependency_snapshot_is_empty_not_an_error() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let def = processor_def(
            Some(HandlerRef::Expression("{usd: 0}".to_string())),
            "missing_upstream.price",
        );
        let sink = Arc::new(MockTimeSeriesSink::new());
        let storage = Arc::new(StorageSink::new(Arc::clone(&cache), Arc::clone(&sink) as _));
        let context = test_context(cache);

        let ingester_body = body(storage, Arc::new(HandlerRegistry::new()));
        ingester_body(context, Arc::new(def)).await.unwrap();

        let records = sink.records();
        assert_eq!(records[0].fields.get("usd"), Some(&FieldValue::Number(0.0)));
    }
}
