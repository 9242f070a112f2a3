//! Sui caller/logger adapters, built atop [`crate::chain_common`]'s
//! skeleton. `target = "chainId:objectId"`; `selector` is a
//! [`crate::selector`] dotted path into the RPC response.

use std::sync::Arc;

use chomp_core::rpc::RpcPool;
use chomp_core::scheduler::IngesterBody;
use futures::FutureExt;
use serde_json::json;

use crate::chain_common;
use crate::ingest::{self, StorageSink};

/// `sui_getObject(objectId, {showContent: true})`.
#[must_use]
pub fn caller_body(storage: Arc<StorageSink>, pool: Arc<RpcPool>) -> IngesterBody {
    Arc::new(move |context, def| {
        let storage = Arc::clone(&storage);
        let pool = Arc::clone(&pool);
        async move {
            let interval_sec = chomp_core::interval::parse(&def.interval)?;
            let mut fields = ingest::pre_ingest(&def);
            chain_common::run_caller_tick(
                &def,
                &pool,
                "sui_getObject",
                |object_id| json!([object_id, {"showContent": true}]),
                &mut fields,
            )
            .await?;
            ingest::post_ingest(&def, fields, &storage, context.clock.as_ref(), interval_sec).await
        }
        .boxed()
    })
}

/// `sui_getLatestCheckpointSequenceNumber` for the head cursor,
/// `suix_queryEvents` filtered to the object's package for new events.
#[must_use]
pub fn logger_body(storage: Arc<StorageSink>, pool: Arc<RpcPool>) -> IngesterBody {
    Arc::new(move |context, def| {
        let storage = Arc::clone(&storage);
        let pool = Arc::clone(&pool);
        async move {
            let interval_sec = chomp_core::interval::parse(&def.interval)?;
            let mut fields = ingest::pre_ingest(&def);
            chain_common::run_logger_tick(
                &context,
                &def,
                &pool,
                "sui_getLatestCheckpointSequenceNumber",
                "result",
                "suix_queryEvents",
                |object_id, _start, _end| {
                    json!([{"MoveModule": {"package": object_id}}, null, 50, true])
                },
                "result.data",
                &mut fields,
            )
            .await?;
            ingest::post_ingest(&def, fields, &storage, context.clock.as_ref(), interval_sec).await
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logger_event_filter_scopes_to_move_module() {
        let params = json!([{"MoveModule": {"package": "0xabc"}}, null, 50, true]);
        assert_eq!(params[0]["MoveModule"]["package"], "0xabc");
    }
}
