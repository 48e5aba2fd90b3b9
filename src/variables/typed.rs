//! Typed Coercion
//!
//! Turns a fully expanded string into a richer value when the content
//! unambiguously parses as one. Anything else stays a string; coercion
//! never fails.

use serde_json::{Number, Value};

/// Coerces an expanded string into a typed value.
///
/// Recognized forms, in order:
/// - booleans (`true`/`false`, also capitalized)
/// - integers
/// - floats written with digits, `.`, exponent and sign only
/// - JSON arrays and objects
///
/// # Example
/// ```
/// use hpcrunner::variables::typed::coerce;
/// use serde_json::json;
///
/// assert_eq!(coerce("8"), json!(8));
/// assert_eq!(coerce("[1, 2]"), json!([1, 2]));
/// assert_eq!(coerce("mpirun -n 8"), json!("mpirun -n 8"));
/// ```
pub fn coerce(text: &str) -> Value {
    let trimmed = text.trim();

    match trimmed {
        "true" | "True" => return Value::Bool(true),
        "false" | "False" => return Value::Bool(false),
        _ => {}
    }

    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::Number(int.into());
    }

    if looks_like_float(trimmed) {
        if let Some(number) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(number);
        }
    }

    if (trimmed.starts_with('[') && trimmed.ends_with(']'))
        || (trimmed.starts_with('{') && trimmed.ends_with('}'))
    {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return value;
        }
    }

    Value::String(text.to_string())
}

/// Recursively coerces string leaves of an already expanded structure.
pub fn coerce_leaves(value: Value) -> Value {
    match value {
        Value::String(s) => coerce(&s),
        Value::Array(items) => Value::Array(items.into_iter().map(coerce_leaves).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, coerce_leaves(value)))
                .collect(),
        ),
        other => other,
    }
}

// Rejects "inf", "NaN" and friends that f64::from_str accepts.
fn looks_like_float(text: &str) -> bool {
    !text.is_empty()
        && text.chars().any(|c| c.is_ascii_digit())
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars() {
        assert_eq!(coerce("42"), json!(42));
        assert_eq!(coerce("-3"), json!(-3));
        assert_eq!(coerce("2.5"), json!(2.5));
        assert_eq!(coerce("True"), json!(true));
        assert_eq!(coerce("false"), json!(false));
    }

    #[test]
    fn test_collections() {
        assert_eq!(coerce("[1, \"a\"]"), json!([1, "a"]));
        assert_eq!(coerce("{\"k\": 1}"), json!({"k": 1}));
    }

    #[test]
    fn test_fallback_to_string() {
        assert_eq!(coerce("inf"), json!("inf"));
        assert_eq!(coerce("NaN"), json!("NaN"));
        assert_eq!(coerce("[not json"), json!("[not json"));
        assert_eq!(coerce("{n_nodes}*2"), json!("{n_nodes}*2"));
        assert_eq!(coerce("1-2-3"), json!("1-2-3"));
    }

    #[test]
    fn test_coerce_leaves() {
        let value = json!({"a": ["1", "x"], "b": {"c": "true"}});
        assert_eq!(coerce_leaves(value), json!({"a": [1, "x"], "b": {"c": true}}));
    }
}
