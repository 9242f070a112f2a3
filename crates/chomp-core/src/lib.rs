//! Core ingestion-fleet runtime: scheduling, claiming, caching, RPC
//! rotation, and the ingester/field data model, behind ports that
//! `chomp-adapters` and `chomp-runtime` implement and wire up.
//!
//! # Modules
//!
//! | Module | Component | Responsibility |
//! |--------|-----------|-----------------|
//! | [`model`] | A | Ingester/field definitions, dependency graph |
//! | [`claim`] | B | Distributed claim lock over the cache |
//! | [`rpc`] | C | Per-chain RPC endpoint pool with health-aware rotation |
//! | [`interval`] | — | Interval grammar parsing, tick epoch alignment |
//! | [`scheduler`] | F | Main tick loop, worker pool, runtime context |
//! | [`handler`] | — | Handler registry and resolution (registered / expression) |
//! | [`cache`] | — | In-memory `Cache` port implementation |
//! | [`metrics`] | — | Fleet-wide tick/claim metrics |
//! | [`config`] | — | Layered settings (defaults, file, env) |
//! | [`ports`] | — | Trait boundaries to the outside world, plus test mocks |
//! | [`error`] | — | Fleet-wide error type |
//!
//! Component G (source adapters) and component H (the Processor) live in
//! `chomp-adapters`, which implements [`scheduler::IngesterBody`] closures
//! atop these ports. `chomp-runtime` is the process entrypoint that wires
//! everything together.

pub mod cache;
pub mod claim;
pub mod config;
pub mod error;
pub mod handler;
pub mod interval;
pub mod metrics;
pub mod model;
pub mod ports;
pub mod rpc;
pub mod scheduler;

pub use cache::MemoryCache;
pub use claim::ClaimLock;
pub use config::Settings;
pub use error::{ChompError, Result};
pub use handler::{Handler, HandlerInputs, HandlerRegistry, ResolvedHandler};
pub use metrics::{FleetMetrics, FleetSnapshot, TickOutcome};
pub use model::{
    Field, FieldDef, FieldType, FieldValue, HandlerRef, IngesterDef, IngesterType,
    TransformerSpec, detect_dependency_cycle,
};
pub use rpc::RpcPool;
pub use scheduler::{IngesterBody, RuntimeContext, Scheduler};
