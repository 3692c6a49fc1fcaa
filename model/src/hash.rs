//! Canonical hashing of resources (`spec.md` §4.2 step 1).
//!
//! Hashing is deterministic: keys sorted, null vs missing distinguished,
//! nested maps/arrays recursed, floats never used in identity.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::Error;

/// Computes the canonical hash of a resource's authoring fields plus user
/// labels. `fields` must already exclude identity metadata (`ref`, `kind`,
/// `namespace`, `parent`) and system labels.
pub fn canonical_hash(
    fields: &serde_json::Map<String, Value>,
    labels: &BTreeMap<String, String>,
) -> Result<String, Error> {
    let mut canon = serde_json::Map::new();
    canon.insert("fields".to_string(), canonicalize(&Value::Object(fields.clone()))?);
    canon.insert(
        "labels".to_string(),
        canonicalize(&serde_json::to_value(labels).expect("BTreeMap<String,String> always serializes"))?,
    );
    let bytes = serde_json::to_vec(&Value::Object(canon)).expect("canonicalized value always serializes");
    let digest = Sha256::digest(&bytes);
    Ok(format!("sha256:{digest:x}"))
}

/// Recursively walks a [`Value`], sorting object keys and rejecting floats.
/// Integers are preserved; `null` is preserved distinctly from an absent
/// key (callers never strip nulls before calling this).
fn canonicalize(value: &Value) -> Result<Value, Error> {
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => Ok(value.clone()),
        Value::Number(n) => {
            if n.is_f64() && n.as_i64().is_none() && n.as_u64().is_none() {
                return Err(Error::NonCanonicalNumber(n.to_string()));
            }
            Ok(value.clone())
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(canonicalize(item)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            // serde_json's default `Map` preserves insertion order; BTreeMap
            // here forces a deterministic sort before re-serializing.
            let mut sorted: BTreeMap<String, Value> = BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k.clone(), canonicalize(v)?);
            }
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Ok(Value::Object(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> serde_json::Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = canonical_hash(&map(json!({"a": 1, "b": 2})), &BTreeMap::new()).unwrap();
        let b = canonical_hash(&map(json!({"b": 2, "a": 1})), &BTreeMap::new()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn null_differs_from_missing() {
        let with_null = canonical_hash(&map(json!({"a": null})), &BTreeMap::new()).unwrap();
        let missing = canonical_hash(&map(json!({})), &BTreeMap::new()).unwrap();
        assert_ne!(with_null, missing);
    }

    #[test]
    fn floats_are_rejected() {
        let err = canonical_hash(&map(json!({"a": 1.5})), &BTreeMap::new());
        assert!(matches!(err, Err(Error::NonCanonicalNumber(_))));
    }

    #[test]
    fn labels_are_part_of_identity() {
        let mut labels = BTreeMap::new();
        labels.insert("team".to_string(), "payments".to_string());
        let with_label = canonical_hash(&map(json!({"a": 1})), &labels).unwrap();
        let without = canonical_hash(&map(json!({"a": 1})), &BTreeMap::new()).unwrap();
        assert_ne!(with_label, without);
    }
}
