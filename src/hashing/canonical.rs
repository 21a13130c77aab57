//! Normalization and digesting of arbitrary JSON values.

use std::cmp::Ordering;

use serde::Serialize;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use super::HashingError;

/// Rewrite `value` into its canonical form.
///
/// - every number becomes an `f64`, so `3` and `3.0` are the same value
/// - arrays are normalized element-wise and then sorted (see [`sort_canonical`])
/// - object keys are emitted in sorted order
/// - strings, booleans and null pass through
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Number(n) => normalize_number(n),
        Value::Array(items) => {
            let mut normalized: Vec<Value> = items.iter().map(normalize).collect();
            sort_canonical(&mut normalized);
            Value::Array(normalized)
        }
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            let mut out = Map::with_capacity(fields.len());
            for key in keys {
                out.insert(key.clone(), normalize(&fields[key]));
            }
            Value::Object(out)
        }
        Value::String(_) | Value::Bool(_) | Value::Null => value.clone(),
    }
}

fn normalize_number(n: &Number) -> Value {
    // Every JSON number is representable as f64 (lossy above 2^53, same as the
    // serializer on the other side of the wire).
    n.as_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::Number(n.clone()))
}

/// Sort normalized array elements into a total order.
///
/// When every element reads as a number (JSON numbers, or strings that parse
/// as `f64`) the list is ordered numerically; otherwise by each element's
/// string form. Ties are broken by the compact JSON rendering so that distinct
/// elements never compare equal and the input order cannot leak into the hash.
fn sort_canonical(items: &mut [Value]) {
    let numeric: Option<Vec<f64>> = items.iter().map(numeric_form).collect();

    let mut keyed: Vec<(SortKey, String, Value)> = items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let primary = match &numeric {
                Some(values) => SortKey::Numeric(values[idx]),
                None => SortKey::Text(string_form(item)),
            };
            (primary, rendered(item), item.clone())
        })
        .collect();

    keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    for (slot, (_, _, value)) in items.iter_mut().zip(keyed) {
        *slot = value;
    }
}

enum SortKey {
    Numeric(f64),
    Text(String),
}

impl SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Numeric(a), Self::Numeric(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            // Never mixed within one list.
            (Self::Numeric(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Numeric(_)) => Ordering::Greater,
        }
    }
}

fn numeric_form(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => rendered(other),
    }
}

fn rendered(value: &Value) -> String {
    // Value's Display is compact JSON and cannot fail.
    value.to_string()
}

/// Canonical byte encoding of `value`: normalized, compact JSON.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    normalize(value).to_string().into_bytes()
}

/// Lowercase hex SHA-256 of the canonical encoding of `value`.
pub fn hash_value(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(value));
    hex::encode(hasher.finalize())
}

/// Hash any serializable value through its JSON representation.
pub fn hash_serializable<T: Serialize + ?Sized>(value: &T) -> Result<String, HashingError> {
    let json = serde_json::to_value(value)?;
    Ok(hash_value(&json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer_and_float_hash_identically() {
        assert_eq!(hash_value(&json!({"x": 3})), hash_value(&json!({"x": 3.0})));
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"d": true, "c": "x"}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"c": "x", "d": true}, "b": 1}"#).unwrap();
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn test_list_order_does_not_matter() {
        assert_eq!(
            hash_value(&json!(["dragon", "castle", "sword"])),
            hash_value(&json!(["sword", "dragon", "castle"]))
        );
        assert_eq!(hash_value(&json!([10, 9, 100])), hash_value(&json!([100, 10, 9])));
    }

    #[test]
    fn test_numeric_lists_sort_numerically() {
        assert_eq!(normalize(&json!([10, 9, 100])), json!([9.0, 10.0, 100.0]));
        assert_eq!(normalize(&json!(["10", "9"])), json!(["9", "10"]));
    }

    #[test]
    fn test_mixed_lists_sort_by_string_form() {
        assert_eq!(normalize(&json!(["b", 1, "a"])), json!([1.0, "a", "b"]));
    }

    #[test]
    fn test_equal_primary_keys_break_ties_deterministically() {
        // 1 and "1" share a numeric form; order must still be input-independent.
        assert_eq!(hash_value(&json!([1, "1"])), hash_value(&json!(["1", 1])));
    }

    #[test]
    fn test_scalar_change_changes_hash() {
        assert_ne!(hash_value(&json!({"hp": 10})), hash_value(&json!({"hp": 11})));
        assert_ne!(hash_value(&json!({"flag": true})), hash_value(&json!({"flag": false})));
        assert_ne!(hash_value(&json!({"name": "a"})), hash_value(&json!({"name": "b"})));
    }

    #[test]
    fn test_hash_is_lowercase_hex_sha256() {
        let hash = hash_value(&json!({}));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_hash_serializable_matches_hash_value() {
        #[derive(Serialize)]
        struct Stats {
            hp: i64,
            mana: i64,
        }

        let hashed = hash_serializable(&Stats { hp: 5, mana: 2 }).unwrap();
        assert_eq!(hashed, hash_value(&json!({"mana": 2.0, "hp": 5})));
    }
}
