//! Stand-in [`TimeSeriesSink`] for deployments that haven't wired a real
//! time-series backend yet.
//!
//! The concrete tsdb adapter implementation is explicitly out of scope
//! (§1); `chomp_core::ports::TimeSeriesSink` is the whole of this
//! runtime's contract with it. This sink satisfies that contract by
//! logging each append at debug level, structurally the same role
//! `ghostnet_indexer`'s dropped `store/postgres.rs` would fill, minus the
//! Postgres dependency the non-goal excludes. `Settings::storage.
//! tsdb_adapter` names which real adapter a deployment intends; selecting
//! among adapter implementations happens wherever that adapter crate is
//! wired in, which is nowhere in this exercise's scope.

use async_trait::async_trait;
use chomp_core::ports::{IngestRecord, TimeSeriesSink};
use chomp_core::Result;
use tracing::debug;

/// Logs every record it receives; never fails.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl LoggingSink {
    /// Construct a new logging sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeSeriesSink for LoggingSink {
    async fn append(&self, record: &IngestRecord) -> Result<()> {
        debug!(
            ingester = %record.ingester,
            timestamp = %record.timestamp,
            fields = record.fields.len(),
            "ingest record appended (no tsdb adapter wired; logging only)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    #[tokio::test]
    async fn append_always_succeeds() {
        let sink = LoggingSink::new();
        let record = IngestRecord {
            ingester: "feed".to_string(),
            timestamp: Utc::now(),
            fields: HashMap::new(),
        };
        assert!(sink.append(&record).await.is_ok());
    }
}
