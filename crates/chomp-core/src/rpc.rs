//! RPC Client Pool (component C).
//!
//! Maintains, per chain id, an ordered set of upstream endpoints and
//! per-endpoint health state (`latency_ema`, `consecutive_failures`,
//! `cooldown_until`). [`RpcPool::handle`] returns a [`Handle`] whose
//! external contract is a thin "call method `M` with args `A`" surface
//! (§4.C); endpoint rotation is invisible to callers.
//!
//! The health state machine generalizes
//! `fleet_core::safety::CircuitBreaker` from one breaker per wallet to one
//! breaker-like entry per `(chain_id, endpoint)`, trading the breaker's
//! manual-reset/tripped-set shape for an always-live EMA so "best current
//! endpoint" is a continuous choice rather than a binary trip/no-trip
//! state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::error::{ChompError, Result};
use crate::ports::RpcTransport;

/// Consecutive failures before an endpoint enters cooldown.
const FAILURE_THRESHOLD: u32 = 3;
/// Cooldown backoff cap, regardless of how many times an endpoint has
/// failed.
const MAX_COOLDOWN: Duration = Duration::from_secs(300);
/// Smoothing factor for the latency exponential moving average.
const LATENCY_EMA_ALPHA: f64 = 0.2;

#[derive(Debug, Clone)]
struct EndpointState {
    url: String,
    latency_ema_ms: f64,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

impl EndpointState {
    fn new(url: String) -> Self {
        Self {
            url,
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

    /// Record a failure. Returns `true` if this failure tripped the
    /// endpoint into cooldown.
    fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= FAILURE_THRESHOLD {
            let backoff_secs = 2u64.saturating_pow(self.consecutive_failures - FAILURE_THRESHOLD);
            let backoff = Duration::from_secs(backoff_secs).min(MAX_COOLDOWN);
            self.cooldown_until = Some(Instant::now() + backoff);
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Default)]
struct ChainState {
    endpoints: Vec<EndpointState>,
}

/// Per-chain pool of upstream RPC endpoints with health-aware rotation.
///
/// Holds the transport as a trait object so callers can swap in
/// [`crate::ports::MockRpcTransport`] for deterministic tests.
#[derive(Debug)]
pub struct RpcPool {
    transport: Arc<dyn RpcTransport>,
    chains: RwLock<HashMap<String, ChainState>>,
}

impl RpcPool {
    /// Construct an empty pool atop `transport`.
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            chains: RwLock::new(HashMap::new()),
        }
    }

    /// Register a chain's ordered endpoint set. Re-registering a chain
    /// replaces its endpoint list and resets all health state.
    pub fn register_chain(&self, chain_id: &str, endpoints: Vec<String>) {
        let state = ChainState {
            endpoints: endpoints.into_iter().map(EndpointState::new).collect(),
        };
        self.chains.write().insert(chain_id.to_string(), state);
    }

    /// Obtain a handle for `chain_id`. The handle borrows the pool and
    /// exposes only the thin `call` surface; endpoint selection happens
    /// inside each call.
    #[must_use]
    pub fn handle<'a>(&'a self, chain_id: &'a str) -> Handle<'a> {
        Handle {
            pool: self,
            chain_id,
        }
    }

    fn select_endpoint(&self, chain_id: &str) -> Result<String> {
        let chains = self.chains.read();
        let chain = chains
            .get(chain_id)
            .ok_or_else(|| ChompError::NoHealthyEndpoint {
                chain_id: chain_id.to_string(),
            })?;
        chain
            .endpoints
            .iter()
            .filter(|e| !e.is_in_cooldown())
            .min_by(|a, b| {
                a.latency_ema_ms
                    .partial_cmp(&b.latency_ema_ms)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|e| e.url.clone())
            .ok_or_else(|| ChompError::NoHealthyEndpoint {
                chain_id: chain_id.to_string(),
            })
    }

    fn record_success(&self, chain_id: &str, endpoint: &str, elapsed: Duration) {
        if let Some(chain) = self.chains.write().get_mut(chain_id) {
            if let Some(e) = chain.endpoints.iter_mut().find(|e| e.url == endpoint) {
                e.record_success(elapsed);
            }
        }
    }

    fn record_failure(&self, chain_id: &str, endpoint: &str) {
        if let Some(chain) = self.chains.write().get_mut(chain_id) {
            if let Some(e) = chain.endpoints.iter_mut().find(|e| e.url == endpoint) {
                if e.record_failure() {
                    warn!(chain_id, endpoint, "rpc endpoint entered cooldown");
                }
            }
        }
    }
}

/// A thin, chain-scoped call surface returned by [`RpcPool::handle`].
/// Rotation and health bookkeeping happen transparently inside [`Self::call`].
#[derive(Debug, Clone, Copy)]
pub struct Handle<'a> {
    pool: &'a RpcPool,
    chain_id: &'a str,
}

impl<'a> Handle<'a> {
    /// Call `method` with `params` against the current best endpoint for
    /// this chain, recording latency or failure against that endpoint.
    #[instrument(skip(self, params), fields(chain_id = self.chain_id))]
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let endpoint = self.pool.select_endpoint(self.chain_id)?;
        let started = Instant::now();
        match self.pool.transport.call(&endpoint, method, params).await {
            Ok(value) => {
                self.pool
                    .record_success(self.chain_id, &endpoint, started.elapsed());
                Ok(value)
            }
            Err(err) => {
                self.pool.record_failure(self.chain_id, &endpoint);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::MockRpcTransport;

    #[tokio::test]
    async fn call_reaches_registered_endpoint() {
        let transport = Arc::new(MockRpcTransport::new());
        transport.set_response("http://a", "eth_blockNumber", Value::from(42));
        let pool = RpcPool::new(transport);
        pool.register_chain("1", vec!["http://a".to_string()]);

        let result = pool
            .handle("1")
            .call("eth_blockNumber", Value::Null)
            .await
            .unwrap();
        assert_eq!(result, Value::from(42));
    }

    #[tokio::test]
    async fn failing_endpoint_enters_cooldown_others_keep_serving() {
        let transport = Arc::new(MockRpcTransport::new());
        transport.fail_always("http://bad");
        transport.set_response("http://good-1", "m", Value::from(1));
        transport.set_response("http://good-2", "m", Value::from(1));
        let pool = RpcPool::new(transport.clone());
        pool.register_chain(
            "1",
            vec![
                "http://bad".to_string(),
                "http://good-1".to_string(),
                "http://good-2".to_string(),
            ],
        );

        // Drive three consecutive failures against the bad endpoint by
        // calling until the pool has tried it three times. Since
        // selection picks lowest latency (all start at 0.0), the bad
        // endpoint will be among the first picked; after it's tripped
        // three times it should never be selected again.
        let mut saw_bad = 0;
        for _ in 0..20 {
            let endpoint_calls_before = transport.calls().len();
            let _ = pool.handle("1").call("m", Value::Null).await;
            let calls = transport.calls();
            if calls.len() > endpoint_calls_before && calls.last().unwrap().0 == "http://bad" {
                saw_bad += 1;
            }
        }
        assert!(saw_bad <= FAILURE_THRESHOLD as usize);
    }

    #[tokio::test]
    async fn unknown_chain_is_no_healthy_endpoint() {
        let pool = RpcPool::new(Arc::new(MockRpcTransport::new()));
        let err = pool.handle("unknown").call("m", Value::Null).await;
        assert!(matches!(err, Err(ChompError::NoHealthyEndpoint { .. })));
    }
}
