//! Dot-path parsing and traversal over [`Value`] structures.
//!
//! Paths address object fields by key and array elements by decimal index,
//! e.g. `foo.2.bar`. An empty path addresses the root value.

use crate::value::Value;
use std::collections::HashMap;

/// Split a dot path into segments. The empty string is the root path.
pub fn parse(path: &str) -> Vec<String> {
    if path.is_empty() {
        return Vec::new();
    }
    path.split('.').map(str::to_owned).collect()
}

/// Join segments back into a dot path.
pub fn to_dot_path(segments: &[String]) -> String {
    segments.join(".")
}

/// Resolve a path against a value, returning `None` when any segment is
/// missing or the intermediate value cannot be descended into.
pub fn get<'a>(mut v: &'a Value, segments: &[String]) -> Option<&'a Value> {
    for seg in segments {
        match v {
            Value::Object(fields) => v = fields.get(seg)?,
            Value::Array(items) => {
                let idx: usize = seg.parse().ok()?;
                v = items.get(idx)?;
            }
            _ => return None,
        }
    }
    Some(v)
}

/// Whether a path resolves against a value.
pub fn exists(v: &Value, segments: &[String]) -> bool {
    get(v, segments).is_some()
}

/// Set the value at a path, creating intermediate objects for missing
/// segments. Array segments must parse as in-bounds indices; anything else in
/// the way is replaced by an object.
pub fn set(root: &mut Value, segments: &[String], new: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = new;
        return;
    };
    let mut cursor = root;
    for seg in parents {
        cursor = match cursor {
            // Arrays are only descended, never created by assignment.
            Value::Array(items) => {
                match seg.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                    Some(slot) => slot,
                    None => return,
                }
            }
            other => {
                if !matches!(other, Value::Object(_)) {
                    *other = Value::Object(HashMap::new());
                }
                let Value::Object(fields) = other else {
                    unreachable!()
                };
                fields.entry(seg.clone()).or_insert(Value::Null)
            }
        };
    }
    match cursor {
        Value::Array(items) => {
            if let Some(slot) = last.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                *slot = new;
            }
        }
        other => {
            if !matches!(other, Value::Object(_)) {
                *other = Value::Object(HashMap::new());
            }
            let Value::Object(fields) = other else {
                unreachable!()
            };
            fields.insert(last.clone(), new);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        Value::from_json(json!({"foo": {"bar": [1, 2, {"baz": "qux"}]}}))
    }

    #[test]
    fn get_descends_objects_and_arrays() {
        let v = doc();
        assert_eq!(get(&v, &parse("foo.bar.2.baz")), Some(&Value::from("qux")));
        assert_eq!(get(&v, &parse("foo.bar.0")), Some(&Value::from(1i64)));
        assert_eq!(get(&v, &parse("foo.missing")), None);
        assert_eq!(get(&v, &parse("foo.bar.9")), None);
        assert_eq!(get(&v, &[]), Some(&v));
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut v = Value::from_json(json!({"a": 1}));
        set(&mut v, &parse("b.c"), Value::from("deep"));
        assert_eq!(get(&v, &parse("b.c")), Some(&Value::from("deep")));
        assert_eq!(get(&v, &parse("a")), Some(&Value::from(1i64)));
    }

    #[test]
    fn set_replaces_array_elements_in_bounds() {
        let mut v = doc();
        set(&mut v, &parse("foo.bar.1"), Value::from("swapped"));
        assert_eq!(get(&v, &parse("foo.bar.1")), Some(&Value::from("swapped")));
    }
}
