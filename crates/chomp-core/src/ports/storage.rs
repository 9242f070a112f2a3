//! Time-series storage port (component I's downstream collaborator).
//!
//! The time-series-database adapter implementation is explicitly out of
//! scope (§1); this crate only depends on the thin [`TimeSeriesSink`]
//! interface a real adapter (Timescale, ClickHouse, ...) would implement.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::FieldValue;

/// One completed ingester tick, ready to append to the time-series
/// backend: one logical table per ingester name, columns = field names
/// plus timestamp.
#[derive(Debug, Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct IngestRecord {
    /// Ingester name (the logical table).
    pub ingester: String,
    /// Tick timestamp.
    pub timestamp: DateTime<Utc>,
    /// Field name → value, for fields that produced a value this tick.
    pub fields: HashMap<String, FieldValue>,
}

/// Port for the time-series storage backend.
#[async_trait]
pub trait TimeSeriesSink: Send + Sync {
    /// Append a completed record. Implementations should treat
    /// `(ingester, timestamp)` (and, for loggers, `(ingester, block,
    /// log_index)`) as an idempotency key so tick retries are safe.
    async fn append(&self, record: &IngestRecord) -> Result<()>;
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks {
    //! In-memory [`TimeSeriesSink`] test double recording every append.

    use parking_lot::Mutex;

    use super::{IngestRecord, Result, TimeSeriesSink};
    use async_trait::async_trait;

    /// Records every appended record for assertion in tests.
    #[derive(Debug, Default)]
    pub struct MockTimeSeriesSink {
        records: Mutex<Vec<IngestRecord>>,
    }

    impl MockTimeSeriesSink {
        /// Create an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Snapshot of all records appended so far.
        #[must_use]
        pub fn records(&self) -> Vec<IngestRecord> {
            self.records.lock().clone()
        }
    }

    #[async_trait]
    impl TimeSeriesSink for MockTimeSeriesSink {
        async fn append(&self, record: &IngestRecord) -> Result<()> {
            self.records.lock().push(record.clone());
            Ok(())
        }
    }
}
