//! Crate-wide error taxonomy.
//!
//! Chomp's error model is intentionally flat rather than layered: every
//! failure mode named by the ingestion runtime's error handling design is a
//! variant of a single [`ChompError`] enum, mirroring
//! `fleet_core::error::FleetError` rather than `ghostnet_indexer::error`'s
//! domain/infra/app split. The runtime has no HTTP surface to map errors
//! onto, so the extra layering the indexer needs has no counterpart here.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ChompError>;

/// Every failure mode the ingestion runtime can produce.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChompError {
    /// Malformed configuration or ingester definition. Fatal at startup.
    #[error("config error: {0}")]
    ConfigError(String),

    /// An interval string did not match the `[smhdw]<N>` grammar.
    #[error("invalid interval {spec:?}: {reason}")]
    InvalidInterval {
        /// The offending interval spec, as supplied.
        spec: String,
        /// Why it failed to parse.
        reason: String,
    },

    /// An event signature did not match the expected grammar.
    #[error("invalid signature {signature:?}: {reason}")]
    InvalidSignature {
        /// The offending signature string.
        signature: String,
        /// Why it failed to parse.
        reason: String,
    },

    /// The claim-lock cache backend is unreachable and this instance is not
    /// configured as a stand-alone runner.
    #[error("claim backend unavailable for {ingester}:{epoch}")]
    ClaimBackendUnavailable {
        /// Ingester name the claim was attempted for.
        ingester: String,
        /// Tick epoch the claim was attempted for.
        epoch: i64,
    },

    /// An RPC call to an upstream endpoint failed.
    #[error("rpc error calling {chain_id} via {endpoint}: {source}")]
    RpcError {
        /// Chain id the call targeted.
        chain_id: String,
        /// Endpoint URL that failed.
        endpoint: String,
        /// Underlying transport error.
        #[source]
        source: eyre::Report,
    },

    /// All endpoints for a chain are in cooldown.
    #[error("no healthy endpoint available for chain {chain_id}")]
    NoHealthyEndpoint {
        /// Chain id with no available endpoint.
        chain_id: String,
    },

    /// A single field or log entry failed to decode; the datum is dropped,
    /// others proceed.
    #[error("decode error in {context}: {reason}")]
    DecodeError {
        /// Where the decode failure occurred (field name, contract, etc).
        context: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A processor's handler raised; the whole tick is dropped.
    #[error("handler error in {ingester}: {reason}")]
    HandlerError {
        /// Ingester (processor) name.
        ingester: String,
        /// Handler failure reason.
        reason: String,
    },

    /// A handler name was referenced but never registered.
    #[error("handler {0:?} is not registered")]
    HandlerNotFound(String),

    /// An ingester body exceeded `ingestion_timeout` and was cancelled.
    #[error("ingestion timeout for {ingester} after {elapsed_ms}ms")]
    IngestionTimeout {
        /// Ingester name that timed out.
        ingester: String,
        /// How long it had run before being cancelled.
        elapsed_ms: u64,
    },

    /// The storage sink failed to persist a record. The value remains in
    /// cache so a downstream consumer may still recover it.
    #[error("storage error: {0}")]
    StorageError(String),

    /// The cache backend returned an error unrelated to a specific key.
    #[error("cache error: {0}")]
    CacheError(String),

    /// A value could not be serialized or deserialized for cache storage.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ChompError {
    /// Build a [`ChompError::DecodeError`]. `#[non_exhaustive]` blocks
    /// downstream crates (`chomp-adapters`) from constructing variants
    /// directly via struct-literal syntax, so every variant an adapter
    /// needs to raise gets a constructor here instead.
    #[must_use]
    pub fn decode_error(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DecodeError {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Build a [`ChompError::InvalidSignature`].
    #[must_use]
    pub fn invalid_signature(signature: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSignature {
            signature: signature.into(),
            reason: reason.into(),
        }
    }

    /// Build a [`ChompError::RpcError`].
    #[must_use]
    pub fn rpc_error(chain_id: impl Into<String>, endpoint: impl Into<String>, source: eyre::Report) -> Self {
        Self::RpcError {
            chain_id: chain_id.into(),
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Build a [`ChompError::NoHealthyEndpoint`].
    #[must_use]
    pub fn no_healthy_endpoint(chain_id: impl Into<String>) -> Self {
        Self::NoHealthyEndpoint { chain_id: chain_id.into() }
    }

    /// Build a [`ChompError::StorageError`].
    #[must_use]
    pub fn storage_error(reason: impl Into<String>) -> Self {
        Self::StorageError(reason.into())
    }

    /// Build a [`ChompError::CacheError`].
    #[must_use]
    pub fn cache_error(reason: impl Into<String>) -> Self {
        Self::CacheError(reason.into())
    }

    /// Build a [`ChompError::ConfigError`].
    #[must_use]
    pub fn config_error(reason: impl Into<String>) -> Self {
        Self::ConfigError(reason.into())
    }

    /// Build a [`ChompError::HandlerError`].
    #[must_use]
    pub fn handler_error(ingester: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HandlerError {
            ingester: ingester.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is transient and the operation that produced it
    /// may reasonably be retried on the next tick.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ClaimBackendUnavailable { .. }
                | Self::RpcError { .. }
                | Self::NoHealthyEndpoint { .. }
                | Self::StorageError(_)
                | Self::CacheError(_)
        )
    }

    /// Whether this error should count toward an ingester being skipped
    /// entirely (as opposed to a single field/log datum being dropped).
    #[must_use]
    pub const fn is_tick_fatal(&self) -> bool {
        matches!(
            self,
            Self::HandlerError { .. } | Self::IngestionTimeout { .. } | Self::ConfigError(_)
        )
    }
}
