//! Canonical JSON and content fingerprinting, using `sha256::digest` over
//! canonicalized serialized content for change detection.

use serde_json::Value;

/// Serializes `value` as UTF-8 JSON with no whitespace beyond the minimum
/// and object keys sorted lexicographically at every level, regardless of
/// the crate-wide `preserve_order` feature (which exists for display, not
/// hashing).
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let sorted = sort_keys(value);
    sorted.to_string()
}

/// SHA-256 hex digest over `value`'s canonical JSON form. The synchronizer
/// treats content as an opaque byte bag hashed this way.
#[must_use]
pub fn content_hash(value: &Value) -> String {
    sha256::digest(canonical_json(value))
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn nested_object_keys_are_sorted() {
        let value = json!({"z": {"b": 1, "a": 2}});
        assert_eq!(canonical_json(&value), r#"{"z":{"a":2,"b":1}}"#);
    }

    #[test]
    fn different_content_hashes_differ() {
        let a = json!({"question": "q1"});
        let b = json!({"question": "q2"});
        assert_ne!(content_hash(&a), content_hash(&b));
    }
}
