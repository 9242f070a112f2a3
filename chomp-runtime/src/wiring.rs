//! Wires `chomp-core`'s ports to their concrete implementations and
//! registers a loaded ingester roster with the [`Scheduler`], per §9's
//! design note: "a process-wide `state` ... is a context struct
//! constructed at startup and passed explicitly through the scheduler to
//! each ingester call." This module builds that context and does the
//! constructing; `main` only calls it and runs the result.

use std::collections::HashSet;
use std::sync::Arc;

use chomp_adapters::ingest::StorageSink;
use chomp_adapters::{aptos, chain_common, evm_caller, evm_logger, http_api, processor, solana, static_scrapper, sui, ton, ws_api};
use chomp_adapters::{EvmEndpointPool, HttpRpcTransport};
use chomp_core::cache::MemoryCache;
use chomp_core::claim::ClaimLock;
use chomp_core::config::Settings;
use chomp_core::handler::HandlerRegistry;
use chomp_core::metrics::FleetMetrics;
use chomp_core::model::{IngesterDef, IngesterType};
use chomp_core::ports::{Cache, SystemClock, TimeSeriesSink};
use chomp_core::rpc::RpcPool;
use chomp_core::scheduler::{RuntimeContext, Scheduler};
use chomp_core::{ChompError, Result};
use evm_provider::{ChainProvider, StandardEvmProvider};
use tracing::{error, warn};

/// The assembled, ready-to-run fleet: a context shared by every ingester
/// tick, and a scheduler with the whole roster registered.
pub struct Fleet {
    /// Shared runtime state (cache, claim lock, clock, metrics, identity,
    /// retry/timeout policy).
    pub context: Arc<RuntimeContext>,
    /// The scheduler, with every ingester in `defs` registered.
    pub scheduler: Arc<Scheduler>,
}

/// Build the shared runtime context and register `defs` with a fresh
/// scheduler.
///
/// `sink` is the time-series backend (out of scope to implement
/// concretely, per §1; see [`crate::sink::LoggingSink`] for the
/// no-backend-wired stand-in).
///
/// # Errors
/// Propagates an ingester's [`Scheduler::register`] failure (a malformed
/// interval spec that passed roster validation only because it wasn't
/// checked there — defense in depth) or an `EVM` provider connection
/// failure for a chain with no reachable configured endpoint.
pub async fn build(settings: &Settings, defs: Vec<IngesterDef>, sink: Arc<dyn TimeSeriesSink>) -> Result<Fleet> {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let claim = Arc::new(ClaimLock::new(Arc::clone(&cache), settings.claim.stand_alone));
    let context = Arc::new(RuntimeContext {
        cache: Arc::clone(&cache),
        claim,
        clock: Arc::new(SystemClock::new()),
        metrics: Arc::new(FleetMetrics::new()),
        instance_uid: settings.instance.proc_id.clone(),
        max_retries: settings.scheduler.max_retries,
        ingestion_timeout: settings.scheduler.ingestion_timeout(),
    });

    let http_client = reqwest::Client::builder()
        .build()
        .map_err(|err| ChompError::config_error(format!("building http client: {err}")))?;

    let storage = Arc::new(StorageSink::new(Arc::clone(&cache), sink));
    let handler_registry = Arc::new(HandlerRegistry::new());

    let evm_pool = Arc::new(build_evm_pool(settings, &defs).await);
    let rpc_pool = Arc::new(build_rpc_pool(settings, &defs, http_client.clone()));

    let scheduler = Arc::new(Scheduler::new(Arc::clone(&context), settings.scheduler.worker_pool_size));

    for def in defs {
        let body = match def.ingester_type {
            IngesterType::HttpApi => http_api::body(Arc::clone(&storage), http_client.clone()),
            IngesterType::WsApi => ws_api::body(Arc::clone(&storage)),
            IngesterType::StaticScrapper => static_scrapper::body(Arc::clone(&storage), http_client.clone()),
            IngesterType::EvmCaller => evm_caller::body(Arc::clone(&storage), Arc::clone(&evm_pool)),
            IngesterType::EvmLogger => evm_logger::body(Arc::clone(&storage), Arc::clone(&evm_pool)),
            IngesterType::SolanaCaller => solana::caller_body(Arc::clone(&storage), Arc::clone(&rpc_pool)),
            IngesterType::SolanaLogger => solana::logger_body(Arc::clone(&storage), Arc::clone(&rpc_pool)),
            IngesterType::SuiCaller => sui::caller_body(Arc::clone(&storage), Arc::clone(&rpc_pool)),
            IngesterType::SuiLogger => sui::logger_body(Arc::clone(&storage), Arc::clone(&rpc_pool)),
            IngesterType::AptosLogger => aptos::logger_body(Arc::clone(&storage), Arc::clone(&rpc_pool)),
            IngesterType::TonCaller => ton::caller_body(Arc::clone(&storage), Arc::clone(&rpc_pool)),
            IngesterType::TonLogger => ton::logger_body(Arc::clone(&storage), Arc::clone(&rpc_pool)),
            IngesterType::Processor => processor::body(Arc::clone(&storage), Arc::clone(&handler_registry)),
        };

        let name = def.name.clone();
        if let Err(err) = scheduler.register(def, body).await {
            error!(ingester = %name, error = %err, "failed to register ingester, skipping it");
        }
    }

    Ok(Fleet { context, scheduler })
}

/// Every `chainId` referenced by an EVM-typed ingester's `chainId:address`
/// target, parsed to the `u64` `EvmEndpointPool::register_chain` expects.
fn evm_chain_ids(defs: &[IngesterDef]) -> HashSet<u64> {
    defs.iter()
        .filter(|d| matches!(d.ingester_type, IngesterType::EvmCaller | IngesterType::EvmLogger))
        .flat_map(|d| &d.fields)
        .filter_map(|f| chain_common::parse_target(&f.target))
        .filter_map(|(chain_id, _)| chain_id.parse::<u64>().ok())
        .collect()
}

/// Every `chainId` referenced by a non-EVM chain-family ingester's target,
/// kept as the opaque string [`RpcPool::register_chain`] keys on.
fn non_evm_chain_ids(defs: &[IngesterDef]) -> HashSet<String> {
    defs.iter()
        .filter(|d| {
            matches!(
                d.ingester_type,
                IngesterType::SolanaCaller
                    | IngesterType::SolanaLogger
                    | IngesterType::SuiCaller
                    | IngesterType::SuiLogger
                    | IngesterType::AptosLogger
                    | IngesterType::TonCaller
                    | IngesterType::TonLogger
            )
        })
        .flat_map(|d| &d.fields)
        .filter_map(|f| chain_common::parse_target(&f.target))
        .map(|(chain_id, _)| chain_id.to_string())
        .collect()
}

async fn build_evm_pool(settings: &Settings, defs: &[IngesterDef]) -> EvmEndpointPool {
    let pool = EvmEndpointPool::new();
    for chain_id in evm_chain_ids(defs) {
        let Some(urls) = settings.rpc.chains.get(&chain_id.to_string()) else {
            warn!(chain_id, "no configured rpc endpoints for evm chain, leaving unregistered");
            continue;
        };

        let mut providers: Vec<Arc<dyn ChainProvider>> = Vec::new();
        for url in urls {
            match StandardEvmProvider::new(url).await {
                Ok(provider) => providers.push(Arc::new(provider)),
                Err(err) => warn!(chain_id, url = %url, error = %err, "failed to connect evm provider, skipping endpoint"),
            }
        }

        if providers.is_empty() {
            warn!(chain_id, "no reachable evm endpoints, leaving chain unregistered");
            continue;
        }
        pool.register_chain(chain_id, providers);
    }
    pool
}

fn build_rpc_pool(settings: &Settings, defs: &[IngesterDef], http_client: reqwest::Client) -> RpcPool {
    let transport = Arc::new(HttpRpcTransport::new(http_client));
    let pool = RpcPool::new(transport);
    for chain_id in non_evm_chain_ids(defs) {
        let Some(urls) = settings.rpc.chains.get(&chain_id) else {
            warn!(chain_id = %chain_id, "no configured rpc endpoints for chain, leaving unregistered");
            continue;
        };
        pool.register_chain(&chain_id, urls.clone());
    }
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use chomp_core::model::{FieldDef, FieldType};

    fn def(ingester_type: IngesterType, target: &str) -> IngesterDef {
        IngesterDef {
            name: "x".to_string(),
            ingester_type,
            interval: "s30".to_string(),
            fields: vec![FieldDef {
                name: "f".to_string(),
                field_type: FieldType::Numeric,
                target: target.to_string(),
                selector: String::new(),
                transformers: vec![],
            }],
            handler: None,
        }
    }

    #[test]
    fn evm_chain_ids_parsed_from_numeric_prefix() {
        let defs = vec![def(IngesterType::EvmLogger, "1:0xabc"), def(IngesterType::EvmCaller, "137:0xdef")];
        let ids = evm_chain_ids(&defs);
        assert!(ids.contains(&1));
        assert!(ids.contains(&137));
    }

    #[test]
    fn non_evm_ids_kept_as_strings_and_scoped_to_chain_family_types() {
        let defs = vec![
            def(IngesterType::SolanaLogger, "mainnet:Abc"),
            def(IngesterType::HttpApi, "irrelevant:target"),
        ];
        let ids = non_evm_chain_ids(&defs);
        assert_eq!(ids.len(), 1);
        assert!(ids.contains("mainnet"));
    }
}
