//! JSONPath-like field selectors (component G's `.a.b[0].c` grammar).
//!
//! Every polling adapter (HTTP API, EVM Caller, generic chain callers)
//! extracts a field's value from a parsed JSON response via one of these
//! selectors. The grammar is intentionally small: dotted keys and `[N]`
//! array indices, no filters or wildcards.

use chomp_core::{ChompError, Result};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Parse a selector string into its path segments.
///
/// A leading `$.` or `$` is accepted and discarded, matching the
/// `$.value`-style selectors used elsewhere in the fleet's field
/// definitions.
///
/// # Errors
/// Returns [`ChompError::DecodeError`] if an `[N]` segment's index does not
/// parse as an integer, or a bracket is unterminated.
fn parse(selector: &str) -> Result<Vec<Segment>> {
    let selector = selector.strip_prefix('$').unwrap_or(selector);
    let selector = selector.strip_prefix('.').unwrap_or(selector);

    let mut segments = Vec::new();
    for raw in selector.split('.') {
        if raw.is_empty() {
            continue;
        }
        let mut rest = raw;
        // A segment may carry one or more trailing `[N]` index accessors,
        // e.g. `items[0]` or a matrix-style `cells[0][1]`.
        if let Some(bracket_pos) = rest.find('[') {
            let key = &rest[..bracket_pos];
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_string()));
            }
            rest = &rest[bracket_pos..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let Some(close) = stripped.find(']') else {
                    return Err(ChompError::DecodeError {
                        context: selector.to_string(),
                        reason: "unterminated '[' in selector".to_string(),
                    });
                };
                let index: usize =
                    stripped[..close]
                        .parse()
                        .map_err(|_| ChompError::DecodeError {
                            context: selector.to_string(),
                            reason: format!("{:?} is not a valid array index", &stripped[..close]),
                        })?;
                segments.push(Segment::Index(index));
                rest = &stripped[close + 1..];
            }
        } else {
            segments.push(Segment::Key(rest.to_string()));
        }
    }
    Ok(segments)
}

/// Extract the value at `selector` from `root`, per §4.G's JSONPath-like
/// grammar. Returns `None` if any segment of the path is absent, mirroring
/// JSONPath's "missing data" rather than erroring (a field simply stays
/// `Null` for this tick).
#[must_use]
pub fn extract(root: &Value, selector: &str) -> Option<Value> {
    let segments = parse(selector).ok()?;
    let mut current = root;
    for segment in &segments {
        current = match segment {
            Segment::Key(key) => current.get(key)?,
            Segment::Index(index) => current.get(index)?,
        };
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_key_selector() {
        let v = json!({"price": 42.0});
        assert_eq!(extract(&v, "price"), Some(json!(42.0)));
    }

    #[test]
    fn dollar_dot_prefix_is_stripped() {
        let v = json!({"price": 42.0});
        assert_eq!(extract(&v, "$.price"), Some(json!(42.0)));
    }

    #[test]
    fn nested_dotted_path() {
        let v = json!({"a": {"b": {"c": 7}}});
        assert_eq!(extract(&v, "$.a.b.c"), Some(json!(7)));
    }

    #[test]
    fn array_index_segment() {
        let v = json!({"items": [10, 20, 30]});
        assert_eq!(extract(&v, "$.items[1]"), Some(json!(20)));
    }

    #[test]
    fn combined_key_and_index() {
        let v = json!({"a": {"b": [{"c": 1}, {"c": 2}]}});
        assert_eq!(extract(&v, "$.a.b[1].c"), Some(json!(2)));
    }

    #[test]
    fn missing_path_returns_none() {
        let v = json!({"a": 1});
        assert_eq!(extract(&v, "$.b.c"), None);
    }

    #[test]
    fn out_of_bounds_index_returns_none() {
        let v = json!({"items": [1]});
        assert_eq!(extract(&v, "$.items[5]"), None);
    }
}
