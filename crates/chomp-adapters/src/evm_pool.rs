//! EVM-typed endpoint pool (component C, EVM specialization).
//!
//! `chomp_core::rpc::RpcPool` rotates endpoints behind a raw JSON-RPC
//! [`chomp_core::ports::RpcTransport`] call surface; the EVM adapters need
//! `evm_provider::ChainProvider`'s typed balance/call/log methods instead; so
//! this is the same health/cooldown/latency-EMA state machine
//! (`chomp_core::rpc`, itself generalized from `fleet_core::safety::
//! CircuitBreaker`) wrapping `Arc<dyn ChainProvider>` endpoints rather than a
//! transport trait object.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chomp_core::{ChompError, Result};
use evm_provider::ChainProvider;
use parking_lot::RwLock;
use tracing::warn;

const FAILURE_THRESHOLD: u32 = 3;
const MAX_COOLDOWN: Duration = Duration::from_secs(300);
const LATENCY_EMA_ALPHA: f64 = 0.2;

struct Endpoint {
    provider: Arc<dyn ChainProvider>,
    latency_ema_ms: f64,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

impl Endpoint {
    fn new(provider: Arc<dyn ChainProvider>) -> Self {
        Self {
            provider,
            latency_ema_ms: 0.0,
            consecutive_failures: 0,
            cooldown_until: None,
        }
    }

    fn is_in_cooldown(&self) -> bool {
        self.cooldown_until.is_some_and(|until| until > Instant::now())
    }

    fn record_success(&mut self, elapsed: Duration) {
        self.consecutive_failures = 0;
        self.cooldown_until = None;
        let sample = elapsed.as_secs_f64() * 1000.0;
        self.latency_ema_ms = if self.latency_ema_ms == 0.0 {
            sample
        } else {
            LATENCY_EMA_ALPHA * sample + (1.0 - LATENCY_EMA_ALPHA) * self.latency_ema_ms
        };
    }

    fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= FAILURE_THRESHOLD {
            let backoff_secs = 2u64.saturating_pow(self.consecutive_failures - FAILURE_THRESHOLD);
            self.cooldown_until = Some(Instant::now() + Duration::from_secs(backoff_secs).min(MAX_COOLDOWN));
            true
        } else {
            false
        }
    }
}

/// Per-`chainId` set of `ChainProvider` endpoints with health-aware
/// rotation, mirroring [`chomp_core::rpc::RpcPool`]'s external contract.
#[derive(Default)]
pub struct EvmEndpointPool {
    chains: RwLock<HashMap<u64, Vec<Endpoint>>>,
}

impl EvmEndpointPool {
    /// Construct an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chain's ordered provider set. Re-registering a chain
    /// replaces its endpoint list and resets all health state.
    pub fn register_chain(&self, chain_id: u64, providers: Vec<Arc<dyn ChainProvider>>) {
        let endpoints = providers.into_iter().map(Endpoint::new).collect();
        self.chains.write().insert(chain_id, endpoints);
    }

    fn select(&self, chain_id: u64) -> Result<Arc<dyn ChainProvider>> {
        let chains = self.chains.read();
        let endpoints = chains
            .get(&chain_id)
            .ok_or_else(|| ChompError::no_healthy_endpoint(chain_id.to_string()))?;
        endpoints
            .iter()
            .filter(|e| !e.is_in_cooldown())
            .min_by(|a, b| {
                a.latency_ema_ms
                    .partial_cmp(&b.latency_ema_ms)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|e| Arc::clone(&e.provider))
            .ok_or_else(|| ChompError::no_healthy_endpoint(chain_id.to_string()))
    }

    fn record_success(&self, chain_id: u64, provider: &Arc<dyn ChainProvider>, elapsed: Duration) {
        if let Some(endpoints) = self.chains.write().get_mut(&chain_id) {
            if let Some(endpoint) = endpoints.iter_mut().find(|e| Arc::ptr_eq(&e.provider, provider)) {
                endpoint.record_success(elapsed);
            }
        }
    }

    fn record_failure(&self, chain_id: u64, provider: &Arc<dyn ChainProvider>) {
        if let Some(endpoints) = self.chains.write().get_mut(&chain_id) {
            if let Some(endpoint) = endpoints.iter_mut().find(|e| Arc::ptr_eq(&e.provider, provider)) {
                if endpoint.record_failure() {
                    warn!(chain_id, "evm rpc endpoint entered cooldown");
                }
            }
        }
    }

    /// Run `f` against the current best provider for `chain_id`, recording
    /// latency or failure against that endpoint and translating a provider
    /// error into [`ChompError::RpcError`].
    pub async fn call<T, F, Fut>(&self, chain_id: u64, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn ChainProvider>) -> Fut,
        Fut: Future<Output = std::result::Result<T, evm_provider::error::ProviderError>>,
    {
        let provider = self.select(chain_id)?;
        let started = Instant::now();
        match f(Arc::clone(&provider)).await {
            Ok(value) => {
                self.record_success(chain_id, &provider, started.elapsed());
                Ok(value)
            }
            Err(err) => {
                self.record_failure(chain_id, &provider);
                Err(ChompError::rpc_error(chain_id.to_string(), "evm-provider", eyre::eyre!(err)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;
    use evm_provider::mock::MockProvider;

    #[tokio::test]
    async fn call_reaches_registered_endpoint() {
        let provider: Arc<dyn ChainProvider> = Arc::new(MockProvider::with_chain_id(1));
        let pool = EvmEndpointPool::new();
        pool.register_chain(1, vec![provider]);

        let result = pool.call(1, |p| async move { p.get_balance(Address::ZERO).await }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unknown_chain_is_no_healthy_endpoint() {
        let pool = EvmEndpointPool::new();
        let result = pool.call(99, |p| async move { p.get_balance(Address::ZERO).await }).await;
        assert!(matches!(result, Err(ChompError::NoHealthyEndpoint { .. })));
    }

    #[tokio::test]
    async fn failing_endpoint_eventually_enters_cooldown() {
        struct AlwaysFails;
        #[async_trait::async_trait]
        impl ChainProvider for AlwaysFails {
            fn chain_id(&self) -> u64 {
                1
            }
            async fn get_balance(&self, _address: Address) -> evm_provider::error::Result<alloy::primitives::U256> {
                Err(evm_provider::error::ProviderError::Connection("down".to_string()))
            }
            async fn get_nonce(&self, _address: Address) -> evm_provider::error::Result<u64> {
                Err(evm_provider::error::ProviderError::Connection("down".to_string()))
            }
            async fn send_raw_transaction(
                &self,
                _tx: alloy::primitives::Bytes,
            ) -> evm_provider::error::Result<alloy::primitives::TxHash> {
                Err(evm_provider::error::ProviderError::Connection("down".to_string()))
            }
            async fn wait_for_receipt(
                &self,
                _tx_hash: alloy::primitives::TxHash,
                _timeout: Duration,
            ) -> evm_provider::error::Result<evm_provider::TransactionReceipt> {
                Err(evm_provider::error::ProviderError::Connection("down".to_string()))
            }
            async fn gas_price(&self) -> evm_provider::error::Result<u128> {
                Err(evm_provider::error::ProviderError::Connection("down".to_string()))
            }
            async fn call(&self, _tx: &evm_provider::TransactionRequest) -> evm_provider::error::Result<alloy::primitives::Bytes> {
                Err(evm_provider::error::ProviderError::Connection("down".to_string()))
            }
            async fn get_block_number(&self) -> evm_provider::error::Result<u64> {
                Err(evm_provider::error::ProviderError::Connection("down".to_string()))
            }
            async fn get_logs(&self, _filter: &evm_provider::LogFilter) -> evm_provider::error::Result<Vec<alloy::rpc::types::Log>> {
                Err(evm_provider::error::ProviderError::Connection("down".to_string()))
            }
        }

        let provider: Arc<dyn ChainProvider> = Arc::new(AlwaysFails);
        let pool = EvmEndpointPool::new();
        pool.register_chain(1, vec![provider]);

        for _ in 0..FAILURE_THRESHOLD {
            let _ = pool.call(1, |p| async move { p.get_balance(Address::ZERO).await }).await;
        }
        let result = pool.call(1, |p| async move { p.get_balance(Address::ZERO).await }).await;
        assert!(matches!(result, Err(ChompError::NoHealthyEndpoint { .. })));
    }
}
