//! Concrete [`chomp_core::ports::RpcTransport`] implementation: the
//! production "RPC Client" collaborator the spec treats as external
//! (§1), wired up here over `reqwest` since that's the HTTP stack this
//! crate already carries for [`crate::http_api`] and
//! [`crate::static_scrapper`].
//!
//! Two call shapes are in use across the non-EVM adapters (§4.G): a
//! standard JSON-RPC 2.0 envelope (Solana, Sui, TON) and a REST path
//! with query parameters (Aptos, documented on
//! [`crate::aptos::logger_body`] as "`method` here is the REST path and
//! `params` supplies the query string"). This transport dispatches on
//! whether `method` starts with `/`: a leading slash means REST, anything
//! else means JSON-RPC.

use async_trait::async_trait;
use chomp_core::ports::RpcTransport;
use chomp_core::{ChompError, Result};
use serde_json::Value;

/// Monotonic JSON-RPC request id. The exact value doesn't matter since
/// every caller here is a single in-flight request/response pair, not a
/// pipelined batch; it only has to be present per the 2.0 envelope.
const JSON_RPC_ID: u64 = 1;

/// A [`RpcTransport`] backed by a shared `reqwest::Client`, suitable for
/// JSON-RPC (Solana, Sui, TON) and simple REST-path (Aptos) endpoints.
#[derive(Debug, Clone)]
pub struct HttpRpcTransport {
    client: reqwest::Client,
}

impl HttpRpcTransport {
    /// Construct a transport atop a shared, connection-pooled client.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn call_json_rpc(&self, endpoint: &str, method: &str, params: Value) -> Result<Value> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": JSON_RPC_ID,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| ChompError::rpc_error(endpoint, endpoint, eyre::eyre!(err)))?
            .error_for_status()
            .map_err(|err| ChompError::rpc_error(endpoint, endpoint, eyre::eyre!(err)))?;

        let mut envelope: Value = response
            .json()
            .await
            .map_err(|err| ChompError::rpc_error(endpoint, endpoint, eyre::eyre!(err)))?;

        if let Some(error) = envelope.get("error") {
            return Err(ChompError::rpc_error(endpoint, endpoint, eyre::eyre!(error.to_string())));
        }
        Ok(envelope["result"].take())
    }

    async fn call_rest(&self, endpoint: &str, path: &str, params: Value) -> Result<Value> {
        let mut resolved_path = path.to_string();
        let mut query: Vec<(String, String)> = Vec::new();
        if let Value::Object(map) = &params {
            for (key, value) in map {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let placeholder = format!("{{{key}}}");
                if resolved_path.contains(&placeholder) {
                    resolved_path = resolved_path.replace(&placeholder, &rendered);
                } else {
                    query.push((key.clone(), rendered));
                }
            }
        }

        let url = format!("{}{}", endpoint.trim_end_matches('/'), resolved_path);
        let response = self
            .client
            .get(url)
            .query(&query)
            .send()
            .await
            .map_err(|err| ChompError::rpc_error(endpoint, path, eyre::eyre!(err)))?
            .error_for_status()
            .map_err(|err| ChompError::rpc_error(endpoint, path, eyre::eyre!(err)))?;

        response
            .json::<Value>()
            .await
            .map_err(|err| ChompError::rpc_error(endpoint, path, eyre::eyre!(err)))
    }
}

#[async_trait]
impl RpcTransport for HttpRpcTransport {
    async fn call(&self, endpoint: &str, method: &str, params: Value) -> Result<Value> {
        if let Some(path) = method.strip_prefix('/').map(|_| method) {
            self.call_rest(endpoint, path, params).await
        } else {
            self.call_json_rpc(endpoint, method, params).await
        }
    }
}
