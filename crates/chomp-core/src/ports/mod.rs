//! Port definitions for dependency injection and testability.
//!
//! Ports are trait definitions that describe what the ingestion runtime
//! needs from the outside world. Following hexagonal architecture, adapters
//! (in `chomp-adapters`, or test mocks co-located here) implement these
//! traits.
//!
//! | Category | Ports | Purpose |
//! |----------|-------|---------|
//! | Caching | [`Cache`] | Key/value store with TTL and `set_if_absent` |
//! | Storage | [`TimeSeriesSink`] | Append-only time-series backend |
//! | Transport | [`RpcTransport`] | Per-chain RPC wire call |
//! | Time | [`Clock`] | Testable time operations |

mod cache;
mod clock;
mod rpc_transport;
mod storage;

pub use cache::{Cache, CacheStats};
pub use clock::{Clock, SystemClock};
pub use rpc_transport::RpcTransport;
pub use storage::{IngestRecord, TimeSeriesSink};

#[cfg(any(test, feature = "test-utils"))]
pub use cache::mocks::MockCache;
#[cfg(any(test, feature = "test-utils"))]
pub use clock::FakeClock;
#[cfg(any(test, feature = "test-utils"))]
pub use rpc_transport::mocks::MockRpcTransport;
#[cfg(any(test, feature = "test-utils"))]
pub use storage::mocks::MockTimeSeriesSink;
