//! Ingester roster loading.
//!
//! The spec's `.yaml`/`.proto` config loader is explicitly out of scope
//! (§1); what's in scope is the schema it feeds, [`chomp_core::IngesterDef`]
//! itself (§3/§6: "Configuration file (YAML/JSON): top-level list of
//! ingester definitions"). This loader covers just enough ground to drive
//! the runtime end to end: a JSON array of `IngesterDef`, deserialized
//! with `serde_json` (already a workspace-wide dependency) rather than
//! pulling in a YAML parser for a loader this binary doesn't own.

use std::path::Path;

use chomp_core::model::{IngesterDef, detect_dependency_cycle};
use chomp_core::{ChompError, Result};

/// Load and validate a roster of ingester definitions from `path`.
///
/// Validates each definition's own invariants (§3: non-empty name,
/// `handler` iff processor-typed) and rejects a cyclic processor
/// dependency graph, per §9's design note (Kahn's algorithm, already
/// implemented as [`detect_dependency_cycle`]).
///
/// # Errors
/// Returns [`ChompError::ConfigError`] if the file cannot be read,
/// parsed, or fails validation.
pub fn load(path: impl AsRef<Path>) -> Result<Vec<IngesterDef>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|err| ChompError::config_error(format!("reading {}: {err}", path.display())))?;
    parse(&raw)
}

/// Parse and validate a roster from an in-memory JSON string, the part of
/// [`load`] that doesn't touch the filesystem (so tests don't need
/// temp files).
///
/// # Errors
/// Returns [`ChompError::ConfigError`] for malformed JSON or a roster
/// that fails validation.
pub fn parse(raw: &str) -> Result<Vec<IngesterDef>> {
    let defs: Vec<IngesterDef> =
        serde_json::from_str(raw).map_err(|err| ChompError::config_error(format!("parsing ingester roster: {err}")))?;

    for def in &defs {
        def.validate()?;
    }
    detect_dependency_cycle(&defs)?;

    Ok(defs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_http_ingester() {
        let raw = r#"[
            {
                "name": "price-feed",
                "type": "http_api",
                "interval": "s30",
                "fields": [
                    {"name": "price", "type": "numeric", "target": "http://example/price", "selector": "$.usd"}
                ]
            }
        ]"#;
        let defs = parse(raw).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "price-feed");
    }

    #[test]
    fn rejects_cyclic_processor_dependencies() {
        let raw = r#"[
            {
                "name": "a",
                "type": "processor",
                "interval": "s30",
                "fields": [{"name": "x", "type": "numeric", "selector": "b.x"}],
                "handler": {"kind": "expression", "value": "b.x"}
            },
            {
                "name": "b",
                "type": "processor",
                "interval": "s30",
                "fields": [{"name": "x", "type": "numeric", "selector": "a.x"}],
                "handler": {"kind": "expression", "value": "a.x"}
            }
        ]"#;
        assert!(matches!(parse(raw), Err(ChompError::ConfigError(_))));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(parse("not json"), Err(ChompError::ConfigError(_))));
    }

    #[test]
    fn rejects_processor_without_handler() {
        let raw = r#"[
            {
                "name": "a",
                "type": "processor",
                "interval": "s30",
                "fields": []
            }
        ]"#;
        assert!(matches!(parse(raw), Err(ChompError::ConfigError(_))));
    }
}
