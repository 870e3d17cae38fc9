//! Field-mask projection.
//!
//! A field mask is a set of dotted paths selecting a subset of a JSON
//! document. Projection copies only the requested paths and the parent
//! objects needed to hold them; everything else is dropped. Arrays are
//! treated as leaves - a path cannot descend into one.

use serde_json::{Map, Value};

/// Project `value` through `mask`.
///
/// An empty mask returns the value unchanged. Paths that don't resolve are
/// skipped silently; a mask is a request, not an assertion.
pub fn project(value: &Value, mask: &[String]) -> Value {
    if mask.is_empty() {
        return value.clone();
    }
    let mut result = Value::Object(Map::new());
    for path in mask {
        if let Some(found) = resolve(value, path) {
            insert_at(&mut result, path, found.clone());
        }
    }
    result
}

fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn insert_at(target: &mut Value, path: &str, value: Value) {
    let mut current = target;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let map = match current.as_object_mut() {
            Some(map) => map,
            // A previous path already claimed this slot as a leaf; the
            // deeper path loses.
            None => return,
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map.entry(segment.to_string()).or_insert_with(|| Value::Object(Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_nested_projection() {
        let doc = json!({"a": {"b": 1, "c": 2}, "d": 3});
        let masked = project(&doc, &["a.b".to_string()]);
        assert_eq!(masked, json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_empty_mask_is_identity() {
        let doc = json!({"a": 1, "b": {"c": 2}});
        assert_eq!(project(&doc, &[]), doc);
    }

    #[test]
    fn test_multiple_paths() {
        let doc = json!({"a": {"b": 1, "c": 2}, "d": 3, "e": 4});
        let mask = vec!["a.c".to_string(), "d".to_string()];
        assert_eq!(project(&doc, &mask), json!({"a": {"c": 2}, "d": 3}));
    }

    #[rstest]
    #[case("missing")]
    #[case("a.missing")]
    #[case("a.b.too.deep")]
    fn test_unresolvable_paths_are_skipped(#[case] path: &str) {
        let doc = json!({"a": {"b": 1}});
        assert_eq!(project(&doc, &[path.to_string()]), json!({}));
    }

    #[test]
    fn test_arrays_are_leaves() {
        let doc = json!({"items": [1, 2, 3]});
        assert_eq!(project(&doc, &["items".to_string()]), json!({"items": [1, 2, 3]}));
        // Cannot descend into an array
        assert_eq!(project(&doc, &["items.0".to_string()]), json!({}));
    }
}
