//! Shared caller/logger skeleton for the non-EVM chain adapters (Solana,
//! Sui, Aptos, TON), grounded on the same exemplar algorithm as
//! [`crate::evm_logger`] (§4.G: "The Solana, Sui, Aptos, TON loggers follow
//! the same skeleton differing only in: signature grammar, transaction/event
//! retrieval call, and decoder") but running over the generic
//! [`chomp_core::rpc::RpcPool`]/[`chomp_core::ports::RpcTransport`] rather
//! than a typed provider, since these chains' adapters speak a single raw
//! JSON-RPC method per call rather than `evm_provider::ChainProvider`'s
//! typed surface.
//!
//! `target = "chainId:address"` as in the EVM adapters; a caller field's
//! `selector` and a logger field's `selector` are both [`crate::selector`]
//! dotted-path expressions applied to the RPC response (caller) or to one
//! retrieved entry (logger, last-matching entry wins, mirroring the EVM
//! logger's "most recent log for this field" behavior when multiple logs
//! land in one tick's block range).

use std::collections::HashMap;
use std::sync::Arc;

use chomp_core::ports::Cache;
use chomp_core::rpc::RpcPool;
use chomp_core::scheduler::RuntimeContext;
use chomp_core::{ChompError, Field, FieldValue, IngesterDef, Result};
use serde_json::Value;
use tracing::warn;

/// Split `target` into `(chainId, address)`. Chain-agnostic: the address is
/// kept as an opaque string, since Solana/Sui/Aptos/TON addresses aren't
/// EVM `Address`es.
pub fn parse_target(target: &str) -> Option<(&str, &str)> {
    target.split_once(':')
}

/// Group a field slice's indices by their `target`.
pub fn group_by_target(fields: &[Field]) -> HashMap<String, Vec<usize>> {
    let mut by_target: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, field) in fields.iter().enumerate() {
        by_target.entry(field.def.target.clone()).or_default().push(index);
    }
    by_target
}

/// Caller skeleton: one RPC call per `(chainId, address)` target, each
/// field's value read out of the shared response via its `selector`.
pub async fn run_caller_tick(
    def: &IngesterDef,
    pool: &RpcPool,
    method: &str,
    params: impl Fn(&str) -> Value,
    fields: &mut [Field],
) -> Result<()> {
    for (target, indices) in group_by_target(fields) {
        let Some((chain_id, address)) = parse_target(&target) else {
            warn!(ingester = %def.name, target = %target, "malformed chainId:address target");
            continue;
        };

        match pool.handle(chain_id).call(method, params(address)).await {
            Ok(response) => {
                for index in indices {
                    let selector = fields[index].def.selector.clone();
                    match crate::selector::extract(&response, &selector) {
                        Some(value) => fields[index].value = FieldValue::from(value),
                        None => warn!(
                            ingester = %def.name,
                            field = %fields[index].def.name,
                            selector = %selector,
                            "selector matched nothing in rpc response"
                        ),
                    }
                }
            }
            Err(err) => {
                warn!(ingester = %def.name, target = %target, error = %err, "chain caller rpc failed");
            }
        }
    }
    Ok(())
}

fn last_block_cache_key(target: &str) -> String {
    format!("chomp:lastblock:{target}")
}

async fn stored_last_block(context: &RuntimeContext, target: &str) -> Result<Option<u64>> {
    let Some(bytes) = context.cache.get(&last_block_cache_key(target)).await? else {
        return Ok(None);
    };
    Ok(String::from_utf8_lossy(&bytes).parse().ok())
}

async fn advance_last_block(context: &RuntimeContext, target: &str, block: u64) -> Result<()> {
    context
        .cache
        .set(&last_block_cache_key(target), block.to_string().into_bytes(), None)
        .await
}

/// Logger skeleton. `head_selector` pulls the current slot/ledger
/// version/seqno out of the head-call response; `entries_selector` pulls
/// the array of new entries out of the events-call response (empty string
/// if the response *is* the array). Each field's `selector` is then applied
/// per entry; the last entry with a non-null match wins. `storedLastBlock`
/// advances to `current + 1` only if the events call succeeds.
pub async fn run_logger_tick(
    context: &RuntimeContext,
    def: &IngesterDef,
    pool: &RpcPool,
    head_method: &str,
    head_selector: &str,
    events_method: &str,
    events_params: impl Fn(&str, u64, u64) -> Value,
    entries_selector: &str,
    fields: &mut [Field],
) -> Result<()> {
    for (target, indices) in group_by_target(fields) {
        let Some((chain_id, address)) = parse_target(&target) else {
            warn!(ingester = %def.name, target = %target, "malformed chainId:address target");
            continue;
        };

        if let Err(err) = run_one_contract(
            context,
            def,
            pool,
            chain_id,
            address,
            &target,
            head_method,
            head_selector,
            events_method,
            &events_params,
            entries_selector,
            &indices,
            fields,
        )
        .await
        {
            warn!(ingester = %def.name, target = %target, error = %err, "chain logger tick failed");
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_one_contract(
    context: &RuntimeContext,
    def: &IngesterDef,
    pool: &RpcPool,
    chain_id: &str,
    address: &str,
    target: &str,
    head_method: &str,
    head_selector: &str,
    events_method: &str,
    events_params: &impl Fn(&str, u64, u64) -> Value,
    entries_selector: &str,
    indices: &[usize],
    fields: &mut [Field],
) -> Result<()> {
    let head_response = pool.handle(chain_id).call(head_method, Value::Null).await?;
    let current = crate::selector::extract(&head_response, head_selector)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| ChompError::decode_error(head_method, "head response missing a numeric cursor"))?;

    let start = stored_last_block(context, target).await?.unwrap_or(current);
    let end = current;
    if start >= end {
        return Ok(());
    }

    let response = pool.handle(chain_id).call(events_method, events_params(address, start, end)).await?;
    let entries: Vec<Value> = match crate::selector::extract(&response, entries_selector) {
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
    };

    for index in indices {
        let selector = fields[*index].def.selector.clone();
        let mut matched = None;
        for entry in &entries {
            if let Some(value) = crate::selector::extract(entry, &selector) {
                matched = Some(value);
            }
        }
        match matched {
            Some(value) => fields[*index].value = FieldValue::from(value),
            None => {
                if !entries.is_empty() {
                    warn!(
                        ingester = %def.name,
                        field = %fields[*index].def.name,
                        "selector matched no entry this tick"
                    );
                }
            }
        }
    }

    advance_last_block(context, target, end + 1).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_target_splits_chain_and_address() {
        assert_eq!(parse_target("101:ABCDEF"), Some(("101", "ABCDEF")));
        assert_eq!(parse_target("malformed"), None);
    }

    #[test]
    fn group_by_target_buckets_field_indices() {
        use chomp_core::model::{FieldDef, FieldType};

        let fields = vec![
            Field::new(FieldDef {
                name: "a".to_string(),
                field_type: FieldType::Numeric,
                target: "1:x".to_string(),
                selector: String::new(),
                transformers: vec![],
            }),
            Field::new(FieldDef {
                name: "b".to_string(),
                field_type: FieldType::Numeric,
                target: "1:y".to_string(),
                selector: String::new(),
                transformers: vec![],
            }),
            Field::new(FieldDef {
                name: "c".to_string(),
                field_type: FieldType::Numeric,
                target: "1:x".to_string(),
                selector: String::new(),
                transformers: vec![],
            }),
        ];

        let groups = group_by_target(&fields);
        assert_eq!(groups.get("1:x"), Some(&vec![0, 2]));
        assert_eq!(groups.get("1:y"), Some(&vec![1]));
    }
}
