//! Canonical form for relationship selections coming from forms and API payloads.

use serde_json::Value;

/// Flatten any accepted selection shape into an ordered list of string ids.
///
/// Accepts `null`, a single id (string or number), an array of ids, or an
/// `{ "ids": [...], "details": [...] }` object. Falsy entries (`null`, `false`,
/// `""`, `0`) are dropped and everything else that is not a string or number
/// degrades to nothing. Applying it to its own output returns the same list.
pub fn normalize_ids(input: &Value) -> Vec<String> {
    match input {
        Value::Array(items) => items.iter().filter_map(scalar_id).collect(),
        Value::Object(map) => match map.get("ids") {
            Some(Value::Array(items)) => items.iter().filter_map(scalar_id).collect(),
            _ => Vec::new(),
        },
        other => scalar_id(other).into_iter().collect(),
    }
}

fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

/// Drop repeated ids, keeping the first occurrence of each.
pub fn dedup_ids(ids: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    let mut unique = Vec::with_capacity(ids.len());
    for id in ids {
        if seen.insert(id.as_str()) {
            unique.push(id.clone());
        }
    }
    unique
}

/// JSON array form stored in a working copy.
pub fn ids_to_value(ids: Vec<String>) -> Value {
    Value::Array(ids.into_iter().map(Value::String).collect())
}
