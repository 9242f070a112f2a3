//! EVM Logger adapter (component G, exemplar for every `*_logger` adapter).
//!
//! Each field's `selector` carries the full event signature and the
//! parameter it projects, separated by the last `.`:
//! `"Transfer(address indexed from,address indexed to,uint256 value).value"`.
//! Fields sharing a `target = chainId:contractAddress` share one decode plan
//! built once per ingester and one monotonic `storedLastBlock` cursor.
//!
//! [`evm_provider::LogFilter`] carries at most one topic hash per position
//! (no OR-list), unlike the `[topics0a, topics0b, …]` union this adapter's
//! signature describes; so instead of one filter per contract this issues
//! one `get_logs` call per `(contract, event)` pair each tick. Functionally
//! equivalent, one RPC round trip per event instead of per contract.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::primitives::{keccak256, Address, B256};
use chomp_core::ports::Cache;
use chomp_core::scheduler::{IngesterBody, RuntimeContext};
use chomp_core::{ChompError, FieldValue, IngesterDef, Result};
use evm_provider::LogFilter;
use futures::FutureExt;
use tracing::warn;

use crate::evm_pool::EvmEndpointPool;
use crate::ingest::{self, StorageSink};

/// One parsed `Name(type1 [indexed] arg1, …)` declaration.
#[derive(Debug, Clone)]
struct EventSignature {
    name: String,
    param_names: Vec<String>,
    param_types: Vec<DynSolType>,
    indexed: Vec<bool>,
    topic_hash: B256,
}

impl EventSignature {
    fn parse(signature: &str) -> Result<Self> {
        let open = signature
            .find('(')
            .ok_or_else(|| ChompError::invalid_signature(signature, "missing '('"))?;
        let close = signature
            .rfind(')')
            .ok_or_else(|| ChompError::invalid_signature(signature, "missing ')'"))?;
        if close < open {
            return Err(ChompError::invalid_signature(signature, "unbalanced parentheses"));
        }
        let name = signature[..open].trim().to_string();
        let inside = signature[open + 1..close].trim();

        let mut param_names = Vec::new();
        let mut param_types = Vec::new();
        let mut canonical_types = Vec::new();
        let mut indexed = Vec::new();
        if !inside.is_empty() {
            for raw_param in inside.split(',') {
                let tokens: Vec<&str> = raw_param.split_whitespace().collect();
                if tokens.len() < 2 {
                    return Err(ChompError::invalid_signature(
                        signature,
                        format!("malformed parameter {raw_param:?}"),
                    ));
                }
                let abi_type = tokens[0];
                let is_indexed = tokens.iter().any(|t| *t == "indexed");
                let param_name = (*tokens.last().unwrap()).to_string();
                let parsed_type = DynSolType::parse(abi_type)
                    .map_err(|err| ChompError::invalid_signature(signature, err.to_string()))?;
                canonical_types.push(abi_type.to_string());
                param_types.push(parsed_type);
                indexed.push(is_indexed);
                param_names.push(param_name);
            }
        }

        let canonical = format!("{name}({})", canonical_types.join(","));
        let topic_hash = keccak256(canonical.as_bytes());

        Ok(Self {
            name,
            param_names,
            param_types,
            indexed,
            topic_hash,
        })
    }

    fn indexed_types(&self) -> Vec<DynSolType> {
        self.indexed
            .iter()
            .zip(&self.param_types)
            .filter(|(indexed, _)| **indexed)
            .map(|(_, ty)| ty.clone())
            .collect()
    }

    fn non_indexed_types(&self) -> Vec<DynSolType> {
        self.indexed
            .iter()
            .zip(&self.param_types)
            .filter(|(indexed, _)| !**indexed)
            .map(|(_, ty)| ty.clone())
            .collect()
    }
}

/// Given a decoded `[indexed…, nonIndexed…]` sequence and the signature's
/// `indexed[]` mask (in original declaration order), reconstruct the
/// original parameter order.
fn reorder(decoded: &[DynSolValue], indexed_mask: &[bool]) -> Vec<DynSolValue> {
    let split = indexed_mask.iter().filter(|i| **i).count();
    let (mut ip, mut np) = (0usize, split);
    let mut out = Vec::with_capacity(indexed_mask.len());
    for is_indexed in indexed_mask {
        if *is_indexed {
            out.push(decoded[ip].clone());
            ip += 1;
        } else {
            out.push(decoded[np].clone());
            np += 1;
        }
    }
    out
}

/// One field's decode target: which event, which named parameter.
struct FieldPlan {
    field_index: usize,
    event_name: String,
    param_name: String,
}

struct ContractPlan {
    chain_id: u64,
    address: Address,
    events: HashMap<String, EventSignature>,
    topic_to_event: HashMap<B256, String>,
    field_plans: Vec<FieldPlan>,
}

fn split_event_selector(selector: &str) -> Result<(&str, &str)> {
    let dot = selector
        .rfind('.')
        .ok_or_else(|| ChompError::invalid_signature(selector, "expected \"Event(...).param\""))?;
    Ok((&selector[..dot], &selector[dot + 1..]))
}

fn parse_target(target: &str) -> Option<(u64, Address)> {
    let (chain_id, address) = target.split_once(':')?;
    Some((chain_id.parse().ok()?, address.parse().ok()?))
}

fn build_plans(def: &IngesterDef) -> Result<HashMap<String, ContractPlan>> {
    let mut plans: HashMap<String, ContractPlan> = HashMap::new();

    for (index, field) in def.fields.iter().enumerate() {
        let (chain_id, address) = parse_target(&field.target).ok_or_else(|| {
            ChompError::config_error(format!(
                "evm logger field {:?} has malformed target {:?}",
                field.name, field.target
            ))
        })?;
        let (signature, param_name) = split_event_selector(&field.selector)?;
        let event = EventSignature::parse(signature)?;

        let plan = plans.entry(field.target.clone()).or_insert_with(|| ContractPlan {
            chain_id,
            address,
            events: HashMap::new(),
            topic_to_event: HashMap::new(),
            field_plans: Vec::new(),
        });
        plan.topic_to_event.insert(event.topic_hash, event.name.clone());
        plan.events.entry(event.name.clone()).or_insert(event.clone());
        plan.field_plans.push(FieldPlan {
            field_index: index,
            event_name: event.name,
            param_name: param_name.to_string(),
        });
    }

    Ok(plans)
}

/// Construct the EVM Logger ingester body.
#[must_use]
pub fn body(storage: Arc<StorageSink>, pool: Arc<EvmEndpointPool>) -> IngesterBody {
    let plans: Arc<OnceLock<HashMap<String, ContractPlan>>> = Arc::new(OnceLock::new());
    Arc::new(move |context, def| {
        let storage = Arc::clone(&storage);
        let pool = Arc::clone(&pool);
        let plans = Arc::clone(&plans);
        run_tick(context, def, storage, pool, plans).boxed()
    })
}

async fn run_tick(
    context: Arc<RuntimeContext>,
    def: Arc<IngesterDef>,
    storage: Arc<StorageSink>,
    pool: Arc<EvmEndpointPool>,
    plans: Arc<OnceLock<HashMap<String, ContractPlan>>>,
) -> Result<()> {
    let interval_sec = chomp_core::interval::parse(&def.interval)?;
    let mut fields = ingest::pre_ingest(&def);

    let plans = match plans.get() {
        Some(plans) => plans,
        None => {
            let built = build_plans(&def)?;
            plans.get_or_init(|| built)
        }
    };

    for (target, plan) in plans {
        if let Err(err) = run_contract_tick(&context, &def.name, target, plan, &pool, &mut fields).await {
            warn!(ingester = %def.name, target = %target, error = %err, "evm logger tick failed");
        }
    }

    ingest::post_ingest(&def, fields, &storage, context.clock.as_ref(), interval_sec).await
}

/// `chomp:lastblock:<chainId>:<addr>`, per [`chomp_core::ports::cache`]'s
/// documented key convention. `target` is already `chainId:address`.
fn last_block_cache_key(target: &str) -> String {
    format!("chomp:lastblock:{target}")
}

async fn stored_last_block(context: &RuntimeContext, target: &str) -> Result<Option<u64>> {
    let Some(bytes) = context.cache.get(&last_block_cache_key(target)).await? else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(&bytes);
    Ok(text.parse().ok())
}

async fn advance_last_block(context: &RuntimeContext, target: &str, block: u64) -> Result<()> {
    context
        .cache
        .set(&last_block_cache_key(target), block.to_string().into_bytes(), None)
        .await
}

async fn run_contract_tick(
    context: &RuntimeContext,
    ingester: &str,
    target: &str,
    plan: &ContractPlan,
    pool: &EvmEndpointPool,
    fields: &mut [chomp_core::Field],
) -> Result<()> {
    let current_block = pool.call(plan.chain_id, |p| async move { p.get_block_number().await }).await?;
    let start_block = stored_last_block(context, target).await?.unwrap_or(current_block);
    let end_block = current_block;
    if start_block >= end_block {
        return Ok(());
    }

    let mut decoded_by_event: HashMap<String, Vec<HashMap<String, FieldValue>>> = HashMap::new();

    for event in plan.events.values() {
        let filter = LogFilter::new(start_block, end_block)
            .with_address(plan.address)
            .with_event_signature(event.topic_hash);

        let logs = fetch_logs_with_retry(context, pool, plan.chain_id, &filter).await?;
        for log in logs {
            // topic[0] -> event id via the hash map, per the exemplar
            // algorithm, rather than trusting the single-event filter: a
            // provider that ignores the topic filter would otherwise decode
            // a foreign log against the wrong layout.
            let Some(topic0) = log.topics().first() else {
                continue;
            };
            let Some(event_name) = plan.topic_to_event.get(topic0) else {
                warn!(ingester = %ingester, topic = %topic0, "log topic0 not in signature map, skipping");
                continue;
            };
            let Some(matched_event) = plan.events.get(event_name) else {
                continue;
            };
            match decode_log(matched_event, &log) {
                Ok(values) => decoded_by_event.entry(matched_event.name.clone()).or_default().push(values),
                Err(err) => warn!(ingester = %ingester, event = %matched_event.name, error = %err, "failed to decode log"),
            }
        }
    }

    for plan_entry in &plan.field_plans {
        if let Some(occurrences) = decoded_by_event.get(&plan_entry.event_name) {
            if let Some(last) = occurrences.last() {
                if let Some(value) = last.get(&plan_entry.param_name) {
                    fields[plan_entry.field_index].value = value.clone();
                }
            }
        }
    }

    advance_last_block(context, target, end_block + 1).await?;
    Ok(())
}

async fn fetch_logs_with_retry(
    context: &RuntimeContext,
    pool: &EvmEndpointPool,
    chain_id: u64,
    filter: &LogFilter,
) -> Result<Vec<alloy::rpc::types::Log>> {
    let mut last_err = None;
    for _ in 0..context.max_retries.max(1) {
        match pool.call(chain_id, |p| async move { p.get_logs(filter).await }).await {
            Ok(logs) => return Ok(logs),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| ChompError::no_healthy_endpoint(chain_id.to_string())))
}

fn decode_log(event: &EventSignature, log: &alloy::rpc::types::Log) -> Result<HashMap<String, FieldValue>> {
    let topics = log.topics();
    let indexed_topics = topics.get(1..).unwrap_or_default();
    let indexed_types = event.indexed_types();
    if indexed_topics.len() < indexed_types.len() {
        return Err(ChompError::decode_error(
            &event.name,
            "fewer indexed topics than indexed parameters",
        ));
    }

    let mut indexed_values = Vec::with_capacity(indexed_types.len());
    for (ty, topic) in indexed_types.iter().zip(indexed_topics) {
        let value = ty
            .abi_decode(topic.as_slice())
            .map_err(|err| ChompError::decode_error(&event.name, err.to_string()))?;
        indexed_values.push(value);
    }

    let non_indexed_types = event.non_indexed_types();
    let non_indexed_values = if non_indexed_types.is_empty() {
        Vec::new()
    } else {
        let wrapped = DynSolType::Tuple(non_indexed_types);
        let decoded = wrapped
            .abi_decode(log.data().as_ref())
            .map_err(|err| ChompError::decode_error(&event.name, err.to_string()))?;
        match decoded {
            DynSolValue::Tuple(values) => values,
            other => vec![other],
        }
    };

    let flat: Vec<DynSolValue> = indexed_values.into_iter().chain(non_indexed_values).collect();
    let ordered = reorder(&flat, &event.indexed);

    Ok(event
        .param_names
        .iter()
        .cloned()
        .zip(ordered.iter().map(crate::evm_caller::dyn_sol_value_to_field))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signature_with_mixed_indexed_params() {
        let sig = EventSignature::parse("Transfer(address indexed from, address indexed to, uint256 value)").unwrap();
        assert_eq!(sig.name, "Transfer");
        assert_eq!(sig.param_names, vec!["from", "to", "value"]);
        assert_eq!(sig.indexed, vec![true, true, false]);
        assert_eq!(
            sig.param_types,
            vec![DynSolType::Address, DynSolType::Address, DynSolType::Uint(256)]
        );
    }

    #[test]
    fn canonical_signature_hash_strips_names_and_indexed() {
        let sig = EventSignature::parse("Transfer(address indexed from, address indexed to, uint256 value)").unwrap();
        // keccak256("Transfer(address,address,uint256)")
        let expected = keccak256(b"Transfer(address,address,uint256)");
        assert_eq!(sig.topic_hash, expected);
    }

    #[test]
    fn reorder_is_inverse_of_topic_data_split() {
        let indexed_mask = vec![true, true, false];
        let decoded = vec![
            DynSolValue::Address(Address::with_last_byte(1)),
            DynSolValue::Address(Address::with_last_byte(2)),
            DynSolValue::Uint(alloy::primitives::U256::from(1000u64), 256),
        ];
        let ordered = reorder(&decoded, &indexed_mask);
        assert_eq!(ordered, decoded);
    }

    #[test]
    fn split_event_selector_finds_last_dot() {
        let (signature, param) =
            split_event_selector("Transfer(address indexed from,address indexed to,uint256 value).value").unwrap();
        assert_eq!(signature, "Transfer(address indexed from,address indexed to,uint256 value)");
        assert_eq!(param, "value");
    }
}
