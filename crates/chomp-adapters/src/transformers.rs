//! Field transformer registry (the pure-function half of §4.E's
//! `post_ingest`, and §9's closed-registry answer to the Open Question of
//! how much arbitrary logic a `transformers` entry may run).
//!
//! Each [`TransformerSpec`] names a registered transformer and carries
//! positional string arguments it parses itself. Transformers are pure:
//! `FieldValue -> Result<FieldValue>`, no I/O, so a failing transformer can
//! never leave the ingester body in an inconsistent state — per §4.E, a
//! failed transformer just nulls that one field.

use chomp_core::{ChompError, FieldValue, Result, TransformerSpec};

/// Apply `spec`'s transformers to `value` in declared order, short-circuiting
/// on the first failure.
///
/// # Errors
/// Returns [`ChompError::DecodeError`] if a named transformer is unknown, or
/// propagates the transformer's own conversion error.
pub fn apply(value: FieldValue, transformers: &[TransformerSpec]) -> Result<FieldValue> {
    transformers.iter().try_fold(value, |acc, spec| run(spec, acc))
}

fn run(spec: &TransformerSpec, value: FieldValue) -> Result<FieldValue> {
    match spec.name.as_str() {
        "scale" => scale(&spec.args, value),
        "to_upper" => to_upper(value),
        "to_lower" => to_lower(value),
        "hex_decode" => hex_decode(value),
        "abs" => abs(value),
        "round" => round(&spec.args, value),
        "default" => default(&spec.args, value),
        other => Err(ChompError::DecodeError {
            context: "transformer".to_string(),
            reason: format!("unknown transformer {other:?}"),
        }),
    }
}

fn numeric_arg(context: &str, args: &[String], index: usize) -> Result<f64> {
    args.get(index)
        .ok_or_else(|| ChompError::DecodeError {
            context: context.to_string(),
            reason: format!("missing argument at position {index}"),
        })?
        .parse()
        .map_err(|_| ChompError::DecodeError {
            context: context.to_string(),
            reason: format!("argument at position {index} is not a number"),
        })
}

/// Multiply a numeric value by `args[0]`, e.g. converting wei to ether via
/// `scale(0.000000000000000001)`.
fn scale(args: &[String], value: FieldValue) -> Result<FieldValue> {
    let factor = numeric_arg("scale", args, 0)?;
    match value {
        FieldValue::Number(n) => Ok(FieldValue::Number(n * factor)),
        FieldValue::Null => Ok(FieldValue::Null),
        other => Err(ChompError::DecodeError {
            context: "scale".to_string(),
            reason: format!("cannot scale non-numeric value {other:?}"),
        }),
    }
}

fn to_upper(value: FieldValue) -> Result<FieldValue> {
    match value {
        FieldValue::String(s) => Ok(FieldValue::String(s.to_uppercase())),
        FieldValue::Null => Ok(FieldValue::Null),
        other => Err(ChompError::DecodeError {
            context: "to_upper".to_string(),
            reason: format!("cannot upper-case non-string value {other:?}"),
        }),
    }
}

fn to_lower(value: FieldValue) -> Result<FieldValue> {
    match value {
        FieldValue::String(s) => Ok(FieldValue::String(s.to_lowercase())),
        FieldValue::Null => Ok(FieldValue::Null),
        other => Err(ChompError::DecodeError {
            context: "to_lower".to_string(),
            reason: format!("cannot lower-case non-string value {other:?}"),
        }),
    }
}

/// Decode a `0x`-prefixed hex string into `Bytes`.
fn hex_decode(value: FieldValue) -> Result<FieldValue> {
    match value {
        FieldValue::String(s) => {
            let trimmed = s.strip_prefix("0x").unwrap_or(&s);
            let bytes = hex::decode(trimmed).map_err(|err| ChompError::DecodeError {
                context: "hex_decode".to_string(),
                reason: err.to_string(),
            })?;
            Ok(FieldValue::Bytes(bytes))
        }
        FieldValue::Null => Ok(FieldValue::Null),
        other => Err(ChompError::DecodeError {
            context: "hex_decode".to_string(),
            reason: format!("cannot hex-decode non-string value {other:?}"),
        }),
    }
}

fn abs(value: FieldValue) -> Result<FieldValue> {
    match value {
        FieldValue::Number(n) => Ok(FieldValue::Number(n.abs())),
        FieldValue::Null => Ok(FieldValue::Null),
        other => Err(ChompError::DecodeError {
            context: "abs".to_string(),
            reason: format!("cannot take absolute value of {other:?}"),
        }),
    }
}

/// Round a numeric value to `args[0]` decimal places (default 0).
fn round(args: &[String], value: FieldValue) -> Result<FieldValue> {
    let places = if args.is_empty() { 0.0 } else { numeric_arg("round", args, 0)? };
    let factor = 10f64.powf(places);
    match value {
        FieldValue::Number(n) => Ok(FieldValue::Number((n * factor).round() / factor)),
        FieldValue::Null => Ok(FieldValue::Null),
        other => Err(ChompError::DecodeError {
            context: "round".to_string(),
            reason: format!("cannot round non-numeric value {other:?}"),
        }),
    }
}

/// Replace a `Null` value with a constant string/number fallback. Useful
/// when a field's selector legitimately misses sometimes and a sentinel is
/// preferable to a gap in the time series.
fn default(args: &[String], value: FieldValue) -> Result<FieldValue> {
    if value.is_present() {
        return Ok(value);
    }
    let fallback = args.first().ok_or_else(|| ChompError::DecodeError {
        context: "default".to_string(),
        reason: "missing default argument".to_string(),
    })?;
    Ok(fallback
        .parse::<f64>()
        .map_or_else(|_| FieldValue::String(fallback.clone()), FieldValue::Number))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, args: &[&str]) -> TransformerSpec {
        TransformerSpec {
            name: name.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn scale_multiplies_numeric_value() {
        let out = apply(FieldValue::Number(1000.0), &[spec("scale", &["0.001"])]).unwrap();
        assert_eq!(out, FieldValue::Number(1.0));
    }

    #[test]
    fn chained_transformers_apply_in_order() {
        let specs = [spec("scale", &["2"]), spec("round", &["0"])];
        let out = apply(FieldValue::Number(1.4), &specs).unwrap();
        assert_eq!(out, FieldValue::Number(3.0));
    }

    #[test]
    fn to_upper_on_string() {
        let out = apply(FieldValue::String("abc".to_string()), &[spec("to_upper", &[])]).unwrap();
        assert_eq!(out, FieldValue::String("ABC".to_string()));
    }

    #[test]
    fn hex_decode_strips_0x_prefix() {
        let out = apply(FieldValue::String("0xdead".to_string()), &[spec("hex_decode", &[])]).unwrap();
        assert_eq!(out, FieldValue::Bytes(vec![0xde, 0xad]));
    }

    #[test]
    fn unknown_transformer_errors() {
        let err = apply(FieldValue::Number(1.0), &[spec("nope", &[])]);
        assert!(err.is_err());
    }

    #[test]
    fn type_mismatch_errors_instead_of_panicking() {
        let err = apply(FieldValue::String("x".to_string()), &[spec("scale", &["2"])]);
        assert!(err.is_err());
    }

    #[test]
    fn default_only_applies_to_null() {
        let out = apply(FieldValue::Null, &[spec("default", &["0"])]).unwrap();
        assert_eq!(out, FieldValue::Number(0.0));
        let out = apply(FieldValue::Number(5.0), &[spec("default", &["0"])]).unwrap();
        assert_eq!(out, FieldValue::Number(5.0));
    }
}
