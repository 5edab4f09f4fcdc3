//! JSON merge patch (RFC 7396) construction

use serde_json::{Map, Value};

/// Compute the merge patch that turns `original` into `modified`
///
/// Keys removed in `modified` become `null`. Nested objects are diffed
/// recursively; arrays and scalars are replaced whole. Identical documents
/// produce `{}`.
pub fn create_merge_patch(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(orig), Value::Object(modi)) => Value::Object(diff_objects(orig, modi)),
        _ => modified.clone(),
    }
}

fn diff_objects(original: &Map<String, Value>, modified: &Map<String, Value>) -> Map<String, Value> {
    let mut patch = Map::new();

    for key in original.keys() {
        if !modified.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    for (key, new) in modified {
        match original.get(key) {
            // An absent key already reads as null
            None if new.is_null() => {}
            None => {
                patch.insert(key.clone(), new.clone());
            }
            Some(old) if old == new => {}
            Some(Value::Object(old)) if new.is_object() => {
                if let Value::Object(new) = new {
                    let nested = diff_objects(old, new);
                    if !nested.is_empty() {
                        patch.insert(key.clone(), Value::Object(nested));
                    }
                }
            }
            Some(_) => {
                patch.insert(key.clone(), new.clone());
            }
        }
    }

    patch
}

/// Whether a merge patch changes nothing
pub fn is_empty(patch: &Value) -> bool {
    match patch {
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
