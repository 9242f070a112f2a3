//! TON caller/logger adapters, built atop [`crate::chain_common`]'s
//! skeleton. `target = "chainId:address"`; `selector` is a
//! [`crate::selector`] dotted-path expression into the RPC response.

use std::sync::Arc;

use chomp_core::rpc::RpcPool;
use chomp_core::scheduler::IngesterBody;
use futures::FutureExt;
use serde_json::json;

use crate::chain_common;
use crate::ingest::{self, StorageSink};

/// `runGetMethod(address, method, stack)` against a TON Center-shaped
/// endpoint, per field selected out of the returned `stack`.
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
                "runGetMethod",
                |address| json!({"address": address, "method": "get_data", "stack": []}),
                &mut fields,
            )
            .await?;
            ingest::post_ingest(&def, fields, &storage, context.clock.as_ref(), interval_sec).await
        }
        .boxed()
    })
}

/// `getMasterchainInfo` for the head cursor (`last.seqno`),
/// `getTransactions` for new transactions since the last seen logical time.
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
                "getMasterchainInfo",
                "result.last.seqno",
                "getTransactions",
                |address, _start, _end| json!({"address": address, "limit": 100, "archival": true}),
                "result",
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
    fn caller_stack_request_targets_get_data_method() {
        let params = json!({"address": "EQabc", "method": "get_data", "stack": []});
        assert_eq!(params["method"], "get_data");
    }
}
