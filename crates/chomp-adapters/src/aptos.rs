//! Aptos logger adapter, built atop [`crate::chain_common`]'s skeleton.
//! Logger only: [`chomp_core::model::IngesterType`] has no `AptosCaller`
//! variant, only `AptosLogger`. `target = "chainId:address"`; `selector` is
//! a [`crate::selector`] dotted-path expression.

use std::sync::Arc;

use chomp_core::rpc::RpcPool;
use chomp_core::scheduler::IngesterBody;
use futures::FutureExt;
use serde_json::json;

use crate::chain_common;
use crate::ingest::{self, StorageSink};

/// `/blocks/by_height` (via generic RPC `call`, method name used as a
/// placeholder for the REST path) for the head ledger version, then
/// `/accounts/{address}/events/{handle}/{field}`-shaped retrieval for new
/// events. Aptos exposes its node API as REST rather than JSON-RPC, so
/// `method` here is the REST path and `params` supplies the query string as
/// a JSON object; [`chomp_core::ports::RpcTransport`] implementations for
/// Aptos are expected to translate that into the matching HTTP call.
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
                "/v1",
                "ledger_version",
                "/v1/accounts/{address}/events/{handle}/{field_name}",
                |address, start, _end| json!({"address": address, "start": start, "limit": 100}),
                "",
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
    fn events_params_page_from_last_seen_version() {
        let params = json!({"address": "0xabc", "start": 10u64, "limit": 100});
        assert_eq!(params["start"], 10);
        assert_eq!(params["limit"], 100);
    }
}
