//! EVM Caller adapter (component G).
//!
//! Groups fields by `target = chainId:contractAddress`; for each group,
//! issues one batched `eth_call` per field at `latest` and decodes the
//! return value per the field's `selector`.
//!
//! The schema (§3) gives fields only `target`/`selector`/`transformers` — no
//! argument-value slot — so this adapter's selector grammar is restricted to
//! zero-argument view/pure calls: `selector = "name()returnType"`, e.g.
//! `"totalSupply()uint256"` or `"symbol()string"`. The 4-byte function
//! selector is the first four bytes of `keccak256("name()")`, matching
//! [`crate::evm_logger`]'s topic-hash computation; the return type is parsed
//! via `alloy_dyn_abi::DynSolType` and decoded as a single-element tuple,
//! matching how Solidity ABI-encodes a single return value (a dynamic
//! return type is offset-addressed exactly as a 1-tuple would be). See
//! `DESIGN.md` for why this grammar was chosen over threading argument
//! values through the field schema.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::primitives::{keccak256, Address, Bytes};
use chomp_core::scheduler::{IngesterBody, RuntimeContext};
use chomp_core::{ChompError, FieldValue, IngesterDef, Result};
use evm_provider::{ChainProvider, TransactionRequest};
use futures::FutureExt;
use tracing::warn;

use crate::evm_pool::EvmEndpointPool;
use crate::ingest::{self, StorageSink};

/// Construct the EVM Caller ingester body.
#[must_use]
pub fn body(storage: Arc<StorageSink>, pool: Arc<EvmEndpointPool>) -> IngesterBody {
    Arc::new(move |context, def| {
        let storage = Arc::clone(&storage);
        let pool = Arc::clone(&pool);
        run_tick(context, def, storage, pool).boxed()
    })
}

async fn run_tick(
    context: Arc<RuntimeContext>,
    def: Arc<IngesterDef>,
    storage: Arc<StorageSink>,
    pool: Arc<EvmEndpointPool>,
) -> Result<()> {
    let interval_sec = chomp_core::interval::parse(&def.interval)?;
    let mut fields = ingest::pre_ingest(&def);

    let mut by_target: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, field) in fields.iter().enumerate() {
        by_target.entry(field.def.target.clone()).or_default().push(index);
    }

    for (target, indices) in by_target {
        let Some((chain_id, address)) = parse_target(&target) else {
            warn!(ingester = %def.name, target = %target, "malformed chainId:contractAddress target");
            continue;
        };

        for index in indices {
            let selector = fields[index].def.selector.clone();
            match call_one(&pool, chain_id, address, &selector).await {
                Ok(value) => fields[index].value = value,
                Err(err) => {
                    warn!(
                        ingester = %def.name,
                        field = %fields[index].def.name,
                        error = %err,
                        "evm call failed"
                    );
                }
            }
        }
    }

    ingest::post_ingest(&def, fields, &storage, context.clock.as_ref(), interval_sec).await
}

fn parse_target(target: &str) -> Option<(u64, Address)> {
    let (chain_id, address) = target.split_once(':')?;
    let chain_id: u64 = chain_id.parse().ok()?;
    let address: Address = address.parse().ok()?;
    Some((chain_id, address))
}

/// Parse `"name()returnType"` into `(calldata selector bytes, return type)`.
fn parse_caller_selector(selector: &str) -> Result<([u8; 4], DynSolType)> {
    let close = selector.find(')').ok_or_else(|| {
        ChompError::invalid_signature(selector, "missing closing ')' in caller selector")
    })?;
    let name = &selector[..selector.find('(').unwrap_or(close)];
    let return_type = &selector[close + 1..];
    if name.is_empty() || return_type.is_empty() {
        return Err(ChompError::invalid_signature(
            selector,
            "expected \"name()returnType\"",
        ));
    }

    let canonical = format!("{name}()");
    let hash = keccak256(canonical.as_bytes());
    let mut calldata_selector = [0u8; 4];
    calldata_selector.copy_from_slice(&hash[..4]);

    let parsed_return = DynSolType::parse(return_type)
        .map_err(|err| ChompError::invalid_signature(selector, err.to_string()))?;

    Ok((calldata_selector, parsed_return))
}

async fn call_one(
    pool: &EvmEndpointPool,
    chain_id: u64,
    address: Address,
    selector: &str,
) -> Result<FieldValue> {
    let (calldata_selector, return_type) = parse_caller_selector(selector)?;
    let request = TransactionRequest::new().to(address).data(Bytes::from(calldata_selector.to_vec()));

    let data = pool
        .call(chain_id, |provider| async move { provider.call(&request).await })
        .await?;

    let wrapped = DynSolType::Tuple(vec![return_type]);
    let decoded = wrapped
        .abi_decode(&data)
        .map_err(|err| ChompError::decode_error(selector, err.to_string()))?;
    let DynSolValue::Tuple(mut values) = decoded else {
        return Err(ChompError::decode_error(selector, "expected a 1-tuple decode result"));
    };
    let value = values.pop().ok_or_else(|| ChompError::decode_error(selector, "empty decode result"))?;
    Ok(dyn_sol_value_to_field(&value))
}

/// Project a decoded return value onto [`FieldValue`]'s small type set.
/// Shared with [`crate::evm_logger`]'s per-parameter projection.
pub(crate) fn dyn_sol_value_to_field(value: &DynSolValue) -> FieldValue {
    match value {
        DynSolValue::Bool(b) => FieldValue::Number(if *b { 1.0 } else { 0.0 }),
        DynSolValue::Int(i, _) => i.to_string().parse().map_or(FieldValue::Null, FieldValue::Number),
        DynSolValue::Uint(u, _) => u.to_string().parse().map_or(FieldValue::Null, FieldValue::Number),
        DynSolValue::Address(addr) => FieldValue::String(addr.to_string()),
        DynSolValue::FixedBytes(bytes, _) => FieldValue::Bytes(bytes.to_vec()),
        DynSolValue::Bytes(bytes) => FieldValue::Bytes(bytes.clone()),
        DynSolValue::String(s) => FieldValue::String(s.clone()),
        other => FieldValue::Structured(serde_json::json!(format!("{other:?}"))),
    }
}
