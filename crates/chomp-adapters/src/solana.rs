//! Solana caller/logger adapters, built atop [`crate::chain_common`]'s
//! skeleton. `target = "chainId:address"` (chainId distinguishes
//! mainnet/devnet/testnet registrations in the same [`RpcPool`]); a field's
//! `selector` is a [`crate::selector`] dotted-path expression applied to the
//! RPC response.

use std::sync::Arc;

use chomp_core::rpc::RpcPool;
use chomp_core::scheduler::IngesterBody;
use futures::FutureExt;
use serde_json::json;

use crate::chain_common;
use crate::ingest::{self, StorageSink};

/// `getAccountInfo(address, {encoding: jsonParsed})`, per field selected as
/// `result.value...` (the response's JSON-RPC envelope).
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
                "getAccountInfo",
                |address| json!([address, {"encoding": "jsonParsed"}]),
                &mut fields,
            )
            .await?;
            ingest::post_ingest(&def, fields, &storage, context.clock.as_ref(), interval_sec).await
        }
        .boxed()
    })
}

/// `getSlot` for the head cursor, `getSignaturesForAddress` for new
/// transaction signatures since the last tick. Solana's signature pagination
/// (`before`/`until`) doesn't map onto a numeric block range the way EVM's
/// `[startBlock, endBlock]` does, so the slot range only gates *whether* a
/// fetch happens this tick, not the RPC call's own parameters.
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
                "getSlot",
                "result",
                "getSignaturesForAddress",
                |address, _start, _end| json!([address, {"limit": 1000}]),
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
    fn caller_params_wrap_address_with_jsonparsed_encoding() {
        let params = json!(["addr123", {"encoding": "jsonParsed"}]);
        assert_eq!(params[0], "addr123");
        assert_eq!(params[1]["encoding"], "jsonParsed");
    }
}
