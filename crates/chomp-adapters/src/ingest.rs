//! Ingester Model lifecycle hooks (component E), shared by every adapter
//! body: `pre_ingest` resets field values for the new tick, `post_ingest`
//! applies transformers and hands the finished record to the Storage Sink
//! (component I).
//!
//! Field values are transient per §3 ("value is the result of the most
//! recent successful tick or null"), and the Scheduler only threads a
//! `def: Arc<IngesterDef>` through each tick — not a live `Field` list — so
//! "resetting" a field is simply constructing a fresh one from its
//! definition. `pre_ingest` is this crate's single source of that
//! construction, kept as its own step (rather than inlined per adapter) so
//! every adapter starts a tick the same way.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chomp_core::ports::{Cache, Clock, IngestRecord, TimeSeriesSink};
use chomp_core::{Field, FieldValue, IngesterDef, Result};
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::transformers;

/// Build a fresh field list for a new tick, each starting at
/// [`FieldValue::Null`] per §4.E's `pre_ingest`.
#[must_use]
pub fn pre_ingest(def: &IngesterDef) -> Vec<Field> {
    def.fields.iter().cloned().map(Field::new).collect()
}

/// The Storage Sink (component I): normalizes a completed tick's fields
/// into a cache snapshot plus a time-series append.
pub struct StorageSink {
    cache: Arc<dyn Cache>,
    sink: Arc<dyn TimeSeriesSink>,
}

impl StorageSink {
    /// Construct a sink atop the shared cache and a time-series backend.
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>, sink: Arc<dyn TimeSeriesSink>) -> Self {
        Self { cache, sink }
    }

    /// `store(ingester)`: serialize `{timestamp, fieldName -> value}`,
    /// append to the time-series backend, and write the
    /// `chomp:<ingesterName>` cache snapshot with a TTL of twice the
    /// ingester's interval so the most-recent value survives one missed
    /// tick (§4.D).
    ///
    /// # Errors
    /// Propagates a cache write failure. A time-series append failure is
    /// logged but not returned: the cache snapshot (written first) still
    /// lets a downstream processor recover the value, per §7's
    /// `StorageError` semantics.
    pub async fn store(
        &self,
        ingester: &IngesterDef,
        fields: &[Field],
        timestamp: DateTime<Utc>,
        interval_sec: i64,
    ) -> Result<()> {
        let field_map: HashMap<String, FieldValue> = fields
            .iter()
            .map(|f| (f.def.name.clone(), f.value.clone()))
            .collect();

        let bytes = serde_json::to_vec(&field_map)?;
        let ttl_secs = u64::try_from(interval_sec.saturating_mul(2)).unwrap_or(60).max(1);
        self.cache
            .set(&format!("chomp:{}", ingester.name), bytes, Some(Duration::from_secs(ttl_secs)))
            .await?;

        let record = IngestRecord {
            ingester: ingester.name.clone(),
            timestamp,
            fields: field_map,
        };
        if let Err(err) = self.sink.append(&record).await {
            warn!(
                ingester = %ingester.name,
                error = %err,
                "storage sink append failed; cache snapshot retains the value for this tick"
            );
        }
        Ok(())
    }
}

/// Apply each field's transformers in order and forward the result to
/// [`StorageSink::store`], per §4.E's `post_ingest`. A field whose
/// transformer chain fails is nulled rather than failing the whole tick.
pub async fn post_ingest(
    def: &IngesterDef,
    mut fields: Vec<Field>,
    storage: &StorageSink,
    clock: &dyn Clock,
    interval_sec: i64,
) -> Result<()> {
    for field in &mut fields {
        let current = std::mem::replace(&mut field.value, FieldValue::Null);
        match transformers::apply(current, &field.def.transformers) {
            Ok(value) => field.value = value,
            Err(err) => {
                warn!(
                    ingester = %def.name,
                    field = %field.def.name,
                    error = %err,
                    "field transformer failed, value nulled"
                );
            }
        }
    }
    storage.store(def, &fields, clock.now(), interval_sec).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chomp_core::model::{FieldDef, FieldType, IngesterType, TransformerSpec};
    use chomp_core::ports::{FakeClock, MockCache, MockTimeSeriesSink};

    fn sample_def() -> IngesterDef {
        IngesterDef {
            name: "feed".to_string(),
            ingester_type: IngesterType::HttpApi,
            interval: "s30".to_string(),
            fields: vec![
                FieldDef {
                    name: "price".to_string(),
                    field_type: FieldType::Numeric,
                    target: "http://example".to_string(),
                    selector: "$.price".to_string(),
                    transformers: vec![TransformerSpec { name: "scale".to_string(), args: vec!["2".to_string()] }],
                },
                FieldDef {
                    name: "bad".to_string(),
                    field_type: FieldType::Numeric,
                    target: String::new(),
                    selector: String::new(),
                    transformers: vec![TransformerSpec { name: "unknown".to_string(), args: vec![] }],
                },
            ],
            handler: None,
        }
    }

    #[tokio::test]
    async fn post_ingest_applies_transformers_and_stores() {
        let def = sample_def();
        let mut fields = pre_ingest(&def);
        fields[0].value = FieldValue::Number(21.0);
        fields[1].value = FieldValue::Number(1.0);

        let cache = Arc::new(MockCache::new());
        let sink = Arc::new(MockTimeSeriesSink::new());
        let storage = StorageSink::new(Arc::clone(&cache) as _, Arc::clone(&sink) as _);
        let clock = FakeClock::epoch();

        post_ingest(&def, fields, &storage, &clock, 30).await.unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields.get("price"), Some(&FieldValue::Number(42.0)));
        // The failing transformer nulls its own field, not the whole tick.
        assert_eq!(records[0].fields.get("bad"), Some(&FieldValue::Null));

        let cached = cache.get("chomp:feed").await.unwrap();
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn pre_ingest_starts_every_field_at_null() {
        let def = sample_def();
        let fields = pre_ingest(&def);
        assert!(fields.iter().all(|f| matches!(f.value, FieldValue::Null)));
    }
}
