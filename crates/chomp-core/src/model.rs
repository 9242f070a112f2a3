//! Ingester Model (component E).
//!
//! Defines the declarative shape of an ingester and its fields, the
//! transient per-tick value type, and dependency-graph extraction from
//! processor field selectors. `IngesterDef`/`FieldDef` are the
//! `serde::Deserialize` data model a `.yaml`/`.json` config loader would
//! populate; that loader itself is out of scope, but the schema it feeds is
//! not.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{ChompError, Result};

/// Which source-adapter family an ingester belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngesterType {
    /// HTTP/JSON API polling.
    HttpApi,
    /// Persistent WebSocket subscription.
    WsApi,
    /// Static HTML scraping.
    StaticScrapper,
    /// EVM `eth_call` batched reads.
    EvmCaller,
    /// EVM event-log ingestion.
    EvmLogger,
    /// Solana account/RPC reads.
    SolanaCaller,
    /// Solana program-log ingestion.
    SolanaLogger,
    /// Sui object/RPC reads.
    SuiCaller,
    /// Sui event ingestion.
    SuiLogger,
    /// Aptos event ingestion.
    AptosLogger,
    /// TON contract reads.
    TonCaller,
    /// TON event ingestion.
    TonLogger,
    /// Dependency-consuming processor (component H).
    Processor,
}

/// The semantic type tag carried by a field, used by decoders to pick an
/// appropriate parse strategy. Distinct from the transient [`FieldValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// A numeric scalar.
    Numeric,
    /// A UTF-8 string.
    String,
    /// Raw bytes (e.g. an ABI-encoded blob or address).
    Bytes,
    /// A structured (nested object/array) value.
    Structured,
}

/// The transient current-tick value of a field. `Null` both before the
/// first successful tick and after a transformer failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// No value yet, or the last tick's transformer failed.
    Null,
    /// A numeric value (stored as `f64`; integral chain values are decoded
    /// separately into `Bytes`/`String` to avoid precision loss).
    Number(f64),
    /// A string value.
    String(String),
    /// Raw bytes, typically hex-decoded on assignment.
    Bytes(Vec<u8>),
    /// A nested structured value.
    Structured(serde_json::Value),
}

impl Default for FieldValue {
    fn default() -> Self {
        Self::Null
    }
}

impl FieldValue {
    /// `true` unless this is [`FieldValue::Null`].
    #[must_use]
    pub const fn is_present(&self) -> bool {
        !matches!(self, Self::Null)
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Self::String(s),
            other => Self::Structured(other),
        }
    }
}

/// A pure, named value transformation applied in declared order during
/// `post_ingest`. The registry of available transformers is intentionally
/// small and closed (no arbitrary user code), per §9's recommendation to
/// eliminate the `safe_eval` path where feasible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerSpec {
    /// Registered transformer name.
    pub name: String,
    /// Positional string arguments, parsed by the transformer itself.
    #[serde(default)]
    pub args: Vec<String>,
}

/// One column of an ingester's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name, unique within its ingester.
    pub name: String,
    /// Semantic type tag.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Source locator: `chainId:contractAddress` for chain ingesters, a URL
    /// for HTTP/scraper ingesters, empty for processor-only computed
    /// fields.
    #[serde(default)]
    pub target: String,
    /// Source-specific extraction: a JSONPath-like selector, an event
    /// signature, a CSS selector, or `ingesterName.fieldName` for processor
    /// dependencies.
    #[serde(default)]
    pub selector: String,
    /// Transformers applied in order during `post_ingest`.
    #[serde(default)]
    pub transformers: Vec<TransformerSpec>,
}

impl FieldDef {
    /// The `(upstream, field)` pair this selector names, if it has the
    /// `<ingester>.<field>` shape a processor dependency requires. Per
    /// §11, a selector without a dot is not a processor dependency even on
    /// a `processor`-typed ingester (it's a computed field).
    #[must_use]
    pub fn upstream_reference(&self) -> Option<(&str, &str)> {
        self.selector.split_once('.')
    }
}

/// A runtime field: its static definition plus the mutable current-tick
/// value.
#[derive(Debug, Clone)]
pub struct Field {
    /// Static definition.
    pub def: FieldDef,
    /// Most recent successful value, or `Null`.
    pub value: FieldValue,
}

impl Field {
    /// Construct a field at its definition with no value yet.
    #[must_use]
    pub fn new(def: FieldDef) -> Self {
        Self {
            def,
            value: FieldValue::Null,
        }
    }
}

/// How a processor resolves its handler, per §4.H/§9.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum HandlerRef {
    /// Name of a pre-registered handler in the `HandlerRegistry`.
    Registered(String),
    /// A restricted arithmetic expression evaluated per §7's safe evaluator.
    Expression(String),
}

/// Declarative definition of an ingester, as a `.yaml`/`.json` config
/// loader (out of scope) would populate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngesterDef {
    /// Unique, stable name; used as the claim-lock key.
    pub name: String,
    /// Source-adapter family.
    #[serde(rename = "type")]
    pub ingester_type: IngesterType,
    /// Interval spec (`s30`, `m5`, ...), parsed via the Interval Registry.
    pub interval: String,
    /// Ordered field definitions.
    pub fields: Vec<FieldDef>,
    /// Handler resolution, present only on `processor`-typed ingesters.
    #[serde(default)]
    pub handler: Option<HandlerRef>,
}

impl IngesterDef {
    /// Validate the invariants §3 requires of an ingester definition:
    /// non-empty name, and a `handler` only on `ingester_type ==
    /// Processor` (the reverse does not hold: a processor may omit
    /// `handler` and fall back to default dot-selector projection, per
    /// §4.H).
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ChompError::ConfigError(
                "ingester name must not be empty".to_string(),
            ));
        }
        let is_processor = matches!(self.ingester_type, IngesterType::Processor);
        if !is_processor && self.handler.is_some() {
            return Err(ChompError::ConfigError(format!(
                "non-processor ingester {:?} must not declare a handler",
                self.name
            )));
        }
        Ok(())
    }

    /// Unique upstream ingester names referenced by any field's
    /// `<ingester>.<field>`-shaped selector (§3 Dependency Graph / §8.6).
    #[must_use]
    pub fn dependencies(&self) -> HashSet<String> {
        self.fields
            .iter()
            .filter_map(|f| f.upstream_reference())
            .map(|(upstream, _)| upstream.to_string())
            .collect()
    }
}

/// Detect a cycle in the processor dependency graph via Kahn's algorithm,
/// per §9's design note. `defs` must contain every ingester the fleet will
/// register; an edge `a -> b` means `a` depends on `b`.
pub fn detect_dependency_cycle(defs: &[IngesterDef]) -> Result<()> {
    let names: HashSet<&str> = defs.iter().map(|d| d.name.as_str()).collect();
    let mut in_degree: HashMap<&str, usize> = defs.iter().map(|d| (d.name.as_str(), 0)).collect();
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();

    for def in defs {
        for dep in def.dependencies() {
            if !names.contains(dep.as_str()) {
                continue; // external/unregistered upstream; not our cycle to find
            }
            edges.entry(def.name.as_str()).or_default();
            // edge dep -> def.name (dep must "complete" a tick before def can use it)
            edges.entry(dep.as_str()).or_default().push(def.name.as_str());
            *in_degree.entry(def.name.as_str()).or_default() += 1;
        }
    }

    let mut queue: Vec<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut visited = 0usize;

    while let Some(node) = queue.pop() {
        visited += 1;
        if let Some(targets) = edges.get(node) {
            for &target in targets {
                let deg = in_degree.get_mut(target).expect("target degree tracked");
                *deg -= 1;
                if *deg == 0 {
                    queue.push(target);
                }
            }
        }
    }

    if visited != in_degree.len() {
        return Err(ChompError::ConfigError(
            "cyclic dependency detected among processor ingesters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(selector: &str) -> FieldDef {
        FieldDef {
            name: "out".to_string(),
            field_type: FieldType::Numeric,
            target: String::new(),
            selector: selector.to_string(),
            transformers: Vec::new(),
        }
    }

    #[test]
    fn dependencies_extracted_from_dotted_selectors() {
        let def = IngesterDef {
            name: "p".to_string(),
            ingester_type: IngesterType::Processor,
            interval: "s30".to_string(),
            fields: vec![field("priceFeed.usd"), field("priceFeed.eur"), field("raw")],
            handler: Some(HandlerRef::Expression("1".to_string())),
        };
        let deps = def.dependencies();
        assert_eq!(deps.len(), 1);
        assert!(deps.contains("priceFeed"));
    }

    #[test]
    fn processor_requires_handler() {
        let def = IngesterDef {
            name: "p".to_string(),
            ingester_type: IngesterType::Processor,
            interval: "s30".to_string(),
            fields: vec![],
            handler: None,
        };
        assert!(def.validate().is_err());
    }

    #[test]
    fn non_processor_rejects_handler() {
        let def = IngesterDef {
            name: "c".to_string(),
            ingester_type: IngesterType::EvmCaller,
            interval: "s30".to_string(),
            fields: vec![],
            handler: Some(HandlerRef::Expression("1".to_string())),
        };
        assert!(def.validate().is_err());
    }

    #[test]
    fn acyclic_graph_passes() {
        let a = IngesterDef {
            name: "a".to_string(),
            ingester_type: IngesterType::HttpApi,
            interval: "s30".to_string(),
            fields: vec![],
            handler: None,
        };
        let b = IngesterDef {
            name: "b".to_string(),
            ingester_type: IngesterType::Processor,
            interval: "s30".to_string(),
            fields: vec![field("a.x")],
            handler: Some(HandlerRef::Expression("1".to_string())),
        };
        assert!(detect_dependency_cycle(&[a, b]).is_ok());
    }

    #[test]
    fn cyclic_graph_rejected() {
        let a = IngesterDef {
            name: "a".to_string(),
            ingester_type: IngesterType::Processor,
            interval: "s30".to_string(),
            fields: vec![field("b.x")],
            handler: Some(HandlerRef::Expression("1".to_string())),
        };
        let b = IngesterDef {
            name: "b".to_string(),
            ingester_type: IngesterType::Processor,
            interval: "s30".to_string(),
            fields: vec![field("a.x")],
            handler: Some(HandlerRef::Expression("1".to_string())),
        };
        assert!(detect_dependency_cycle(&[a, b]).is_err());
    }
}
