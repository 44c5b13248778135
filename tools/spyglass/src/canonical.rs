//! Deterministic canonicalization of observation values.
//!
//! Maps are rebuilt with sorted keys, sequences keep their order, and floats
//! are rounded to a fixed decimal precision, so that two structurally equal
//! values always render to the same text. Replay-key equality is defined as
//! equality of that text.

use crate::observation::Observation;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Serializer, Value};

pub const DEFAULT_DECIMAL_PRECISION: u32 = 4;

/// Deep-copy `value` into its canonical form: object keys sorted, array
/// order preserved, floats rounded to `precision` decimals.
pub fn canonicalize_value(value: &Value, precision: u32) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize_value(v, precision));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| canonicalize_value(v, precision))
                .collect(),
        ),
        Value::Number(n) => match n.as_f64() {
            // Integers pass through untouched; only true floats are rounded.
            Some(f) if n.as_i64().is_none() && n.as_u64().is_none() => {
                let factor = 10f64.powi(precision as i32);
                let rounded = (f * factor).round() / factor;
                serde_json::Number::from_f64(rounded)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
            _ => value.clone(),
        },
        other => other.clone(),
    }
}

pub fn canonicalize(observation: &Observation, precision: u32) -> Observation {
    match canonicalize_value(&observation.as_value(), precision) {
        Value::Object(map) => Observation::from(map),
        _ => Observation::new(),
    }
}

/// Render the canonical form as pretty JSON with 4-space indentation. This is
/// both the human-readable log format and the replay cache key.
pub fn to_canonical_string(value: &Value, precision: u32) -> String {
    let canonical = canonicalize_value(value, precision);
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = Serializer::with_formatter(&mut buf, formatter);
    if serde::Serialize::serialize(&canonical, &mut ser).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buf).to_string()
}

pub fn observation_to_string(observation: &Observation, precision: u32) -> String {
    to_canonical_string(&observation.as_value(), precision)
}
