//! Source adapters (component G) and the Processor (component H), built
//! atop `chomp-core`'s ports and [`chomp_core::scheduler::IngesterBody`].
//!
//! # Modules
//!
//! | Module | Component | Responsibility |
//! |--------|-----------|-----------------|
//! | [`ingest`] | E | Shared `pre_ingest`/`post_ingest`/[`ingest::StorageSink`] |
//! | [`selector`] | G | JSONPath-like field selector grammar |
//! | [`transformers`] | E | Closed registry of field transformers |
//! | [`http_api`] | G | HTTP/JSON polling adapter |
//! | [`ws_api`] | G | Persistent WebSocket subscription adapter |
//! | [`static_scrapper`] | G | Static HTML scraping adapter |
//! | [`rpc_transport`] | C | Production `RpcTransport` over `reqwest` (JSON-RPC / REST) |
//! | [`evm_pool`] | C | EVM-typed endpoint pool with health-aware rotation |
//! | [`evm_caller`] | G | EVM batched `eth_call` adapter |
//! | [`evm_logger`] | G | EVM event-log ingestion, the spec's decode exemplar |
//! | [`chain_common`] | G | Shared skeleton for the non-EVM chain adapters |
//! | [`solana`], [`sui`], [`aptos`], [`ton`] | G | Per-chain caller/logger adapters |
//! | [`processor`] | H | Dependency-consuming processor |

pub mod chain_common;
pub mod evm_caller;
pub mod evm_logger;
pub mod evm_pool;
pub mod http_api;
pub mod ingest;
pub mod processor;
pub mod rpc_transport;
pub mod selector;
pub mod static_scrapper;
pub mod transformers;
pub mod ws_api;

pub mod aptos;
pub mod solana;
pub mod sui;
pub mod ton;

pub use evm_pool::EvmEndpointPool;
pub use ingest::StorageSink;
pub use rpc_transport::HttpRpcTransport;
