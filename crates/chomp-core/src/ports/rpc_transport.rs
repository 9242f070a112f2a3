//! RPC transport port — the "RPC Client" interface the spec treats as an
//! external collaborator (§1): each chain's wire protocol / SDK shim
//! implements this trait, and [`crate::rpc::RpcPool`] only depends on it,
//! never on a concrete client.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// A single upstream endpoint's request surface: call method `method` with
/// params `params` against `endpoint`, returning the raw JSON result. Chain
/// adapters (EVM, Solana, ...) build typed calls on top of this.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Issue one JSON-RPC-shaped call against `endpoint`.
    async fn call(&self, endpoint: &str, method: &str, params: Value) -> Result<Value>;
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks {
    //! Scriptable [`RpcTransport`] test double.

    use std::collections::HashMap;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;

    use super::RpcTransport;
    use crate::error::{ChompError, Result};

    /// Maps `(endpoint, method)` to either a canned response or a
    /// configured failure count, for deterministic RPC pool tests.
    #[derive(Debug, Default)]
    pub struct MockRpcTransport {
        responses: Mutex<HashMap<(String, String), Value>>,
        /// Endpoints that should always fail, for cooldown tests.
        always_fail: Mutex<std::collections::HashSet<String>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl MockRpcTransport {
        /// Create a transport with no configured responses.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Configure a canned response for `(endpoint, method)`.
        pub fn set_response(&self, endpoint: &str, method: &str, value: Value) {
            self.responses
                .lock()
                .insert((endpoint.to_string(), method.to_string()), value);
        }

        /// Configure an endpoint to always return an error.
        pub fn fail_always(&self, endpoint: &str) {
            self.always_fail.lock().insert(endpoint.to_string());
        }

        /// The `(endpoint, method)` pairs called so far, in order.
        #[must_use]
        pub fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl RpcTransport for MockRpcTransport {
        async fn call(&self, endpoint: &str, method: &str, _params: Value) -> Result<Value> {
            self.calls
                .lock()
                .push((endpoint.to_string(), method.to_string()));
            if self.always_fail.lock().contains(endpoint) {
                return Err(ChompError::RpcError {
                    chain_id: "mock".to_string(),
                    endpoint: endpoint.to_string(),
                    source: eyre::eyre!("endpoint configured to always fail"),
                });
            }
            Ok(self
                .responses
                .lock()
                .get(&(endpoint.to_string(), method.to_string()))
                .cloned()
                .unwrap_or(Value::Null))
        }
    }
}
