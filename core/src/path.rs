//! Dotted-path addressing into a nested `serde_json::Value` tree.
//!
//! Paths like `user.profile.name` walk object keys one segment at a time.
//! Arrays are addressed by numeric segments (`todos.0.done`) and are
//! otherwise treated like any other container. Reads never fail: a missing
//! segment resolves to `None`. Writes never fail: missing intermediate
//! containers are created on the way down.

use serde_json::{Map, Value};

/// Separator between path segments.
pub const SEPARATOR: char = '.';

/// How far past the end of an array a numeric segment may write. Further
/// indices address an object key instead.
pub const MAX_ARRAY_PADDING: usize = 1024;

/// Split a dotted path into its segments.
///
/// The empty path is the single empty segment, so `""` addresses the key
/// `""` of the root object for both reads and writes.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split(SEPARATOR).collect()
}

/// Final segment of a path (`user.profile.name` -> `name`).
pub fn get_last_part(path: &str) -> &str {
    path.rsplit(SEPARATOR).next().unwrap_or(path)
}

/// Read the value at `path`, or `None` if any segment along the way is absent.
pub fn get_nested_value<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split(SEPARATOR) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Mutable counterpart of [`get_nested_value`]. Never creates anything.
pub fn get_nested_value_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path.split(SEPARATOR) {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write `value` at `path`, mutating `root` in place.
///
/// Only the nodes along `path` are touched; sibling subtrees are left as
/// they were. A scalar met along the walk is replaced by an empty object.
/// Array indices up to [`MAX_ARRAY_PADDING`] past the end pad the array with
/// `null`. An array addressed with any other segment (a word, or an index
/// beyond that limit) becomes an object keyed by element index, so the write
/// lands under the segment as a key and the existing elements are kept.
pub fn set_nested_value(root: &mut Value, path: &str, value: Value) {
    let segments = split_path(path);
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = root;
    for segment in parents {
        let slot = slot_mut(current, segment);
        if !(slot.is_object() || slot.is_array()) {
            *slot = Value::Object(Map::new());
        }
        current = slot;
    }
    *slot_mut(current, last) = value;
}

/// Returns the child slot for `segment`, inserting `null` when absent.
fn slot_mut<'a>(node: &'a mut Value, segment: &str) -> &'a mut Value {
    let index = match node {
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .filter(|i| *i <= items.len().saturating_add(MAX_ARRAY_PADDING)),
        _ => None,
    };
    if index.is_none() && !node.is_object() {
        *node = into_object(node.take());
    }

    match node {
        Value::Array(items) => {
            let index = index.unwrap_or(items.len());
            if index >= items.len() {
                items.resize(index.saturating_add(1), Value::Null);
            }
            &mut items[index]
        }
        Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
        _ => unreachable!("non-container nodes are replaced by an object above"),
    }
}

/// Arrays keep their elements under `"0"`, `"1"`, ...; scalars are dropped.
fn into_object(node: Value) -> Value {
    match node {
        Value::Array(items) => Value::Object(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (i.to_string(), item))
                .collect(),
        ),
        _ => Value::Object(Map::new()),
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge `overlay` into `base`.
///
/// Objects merge key by key, recursively. Any other overlay value (scalars,
/// arrays, `null`) replaces the base value outright.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Fold flat-by-path persisted data back into a nested state tree.
///
/// Each key of `persisted` is a dotted path. The stored value is deep-merged
/// into the node at that path, so defaults the persisted data does not
/// mention survive. A whole-state snapshot (top-level keys, no dots) goes
/// through the same walk.
pub fn merge_persisted(state: &mut Value, persisted: Map<String, Value>) {
    for (path, value) in persisted {
        if let Some(existing) = get_nested_value_mut(state, &path) {
            deep_merge(existing, value);
        } else {
            set_nested_value(state, &path, value);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "counter": 3,
            "user": {"name": "Ada", "profile": {"age": 36, "city": "London"}},
            "todos": [{"text": "a", "done": false}, {"text": "b", "done": true}],
        })
    }

    #[test]
    fn get_reads_nested_value() {
        let state = sample();
        assert_eq!(get_nested_value(&state, "user.profile.city"), Some(&json!("London")));
        assert_eq!(get_nested_value(&state, "counter"), Some(&json!(3)));
    }

    #[test]
    fn get_missing_segment_is_none() {
        let state = sample();
        assert_eq!(get_nested_value(&state, "user.missing.deeper"), None);
        assert_eq!(get_nested_value(&state, "nope"), None);
        assert_eq!(get_nested_value(&state, "counter.inner"), None);
    }

    #[test]
    fn get_indexes_arrays_numerically() {
        let state = sample();
        assert_eq!(get_nested_value(&state, "todos.1.done"), Some(&json!(true)));
        assert_eq!(get_nested_value(&state, "todos.9.done"), None);
        assert_eq!(get_nested_value(&state, "todos.first"), None);
    }

    #[test]
    fn set_then_get_round_trips() {
        let paths = ["counter", "user.name", "user.profile.age", "todos.0.text", "new.branch.leaf"];
        for path in paths {
            let mut state = sample();
            set_nested_value(&mut state, path, json!("written"));
            assert_eq!(get_nested_value(&state, path), Some(&json!("written")), "path {}", path);
        }
    }

    #[test]
    fn set_leaves_siblings_untouched() {
        let original = sample();
        let mut state = original.clone();
        set_nested_value(&mut state, "user.profile.age", json!(37));

        assert_eq!(state["user"]["profile"]["city"], original["user"]["profile"]["city"]);
        assert_eq!(state["user"]["name"], original["user"]["name"]);
        assert_eq!(state["todos"], original["todos"]);
        assert_eq!(state["counter"], original["counter"]);
    }

    #[test]
    fn set_creates_missing_intermediates() {
        let mut state = json!({});
        set_nested_value(&mut state, "a.b.c", json!(1));
        assert_eq!(state, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn set_replaces_scalar_intermediate_with_object() {
        let mut state = json!({"a": 5});
        set_nested_value(&mut state, "a.b", json!(true));
        assert_eq!(state, json!({"a": {"b": true}}));
    }

    #[test]
    fn set_on_non_object_root_builds_object() {
        let mut state = Value::Null;
        set_nested_value(&mut state, "x", json!(1));
        assert_eq!(state, json!({"x": 1}));
    }

    #[test]
    fn set_array_index_past_end_pads_with_null() {
        let mut state = json!({"list": [1]});
        set_nested_value(&mut state, "list.3", json!(4));
        assert_eq!(state, json!({"list": [1, null, null, 4]}));
    }

    #[test]
    fn set_array_with_word_segment_becomes_object() {
        let mut state = json!({"list": [1, 2]});
        set_nested_value(&mut state, "list.head", json!(1));
        assert_eq!(state, json!({"list": {"0": 1, "1": 2, "head": 1}}));
    }

    #[test]
    fn set_array_index_within_padding_limit_pads() {
        let mut state = json!({"list": []});
        set_nested_value(&mut state, &format!("list.{}", MAX_ARRAY_PADDING), json!(true));
        let list = state["list"].as_array().unwrap();
        assert_eq!(list.len(), MAX_ARRAY_PADDING + 1);
        assert_eq!(list[MAX_ARRAY_PADDING], json!(true));
    }

    #[test]
    fn set_array_index_far_past_end_becomes_key() {
        let mut state = json!({"list": [1]});
        set_nested_value(&mut state, "list.4000000000", json!(2));
        assert_eq!(state, json!({"list": {"0": 1, "4000000000": 2}}));
        assert_eq!(get_nested_value(&state, "list.4000000000"), Some(&json!(2)));

        let mut state = json!({"list": [1]});
        set_nested_value(&mut state, "list.18446744073709551615", json!(3));
        assert_eq!(
            get_nested_value(&state, "list.18446744073709551615"),
            Some(&json!(3))
        );
        assert_eq!(state["list"]["0"], json!(1));
    }

    #[test]
    fn set_intermediate_far_index_builds_nested_object() {
        let mut state = json!({"list": []});
        set_nested_value(&mut state, "list.99999999.name", json!("x"));
        assert_eq!(state, json!({"list": {"99999999": {"name": "x"}}}));
    }

    #[test]
    fn empty_path_addresses_empty_key() {
        let mut state = json!({"a": 1});
        assert_eq!(get_nested_value(&state, ""), None);
        set_nested_value(&mut state, "", json!("root-slot"));
        assert_eq!(get_nested_value(&state, ""), Some(&json!("root-slot")));
        assert_eq!(state["a"], json!(1));
    }

    #[test]
    fn last_part_of_path() {
        assert_eq!(get_last_part("user.profile.name"), "name");
        assert_eq!(get_last_part("counter"), "counter");
        assert_eq!(get_last_part(""), "");
    }

    #[test]
    fn split_path_segments() {
        assert_eq!(split_path("a.b.c"), vec!["a", "b", "c"]);
        assert_eq!(split_path(""), vec![""]);
    }

    #[test]
    fn get_mut_never_creates() {
        let mut state = json!({"a": {}});
        assert!(get_nested_value_mut(&mut state, "a.b").is_none());
        assert_eq!(state, json!({"a": {}}));
    }

    #[test]
    fn deep_merge_overwrites_only_present_leaves() {
        let mut base = json!({"user": {"name": "John", "age": 30}, "theme": "light"});
        deep_merge(&mut base, json!({"user": {"name": "Bob"}}));
        assert_eq!(base, json!({"user": {"name": "Bob", "age": 30}, "theme": "light"}));
    }

    #[test]
    fn deep_merge_replaces_arrays_and_scalars() {
        let mut base = json!({"list": [1, 2, 3], "n": {"deep": 1}});
        deep_merge(&mut base, json!({"list": [9], "n": 4}));
        assert_eq!(base, json!({"list": [9], "n": 4}));
    }

    #[test]
    fn merge_persisted_applies_flat_paths() {
        let mut state = json!({"counter": 0, "user": {"name": "John", "age": 30}, "theme": "light"});
        let persisted = json!({"user.name": "Bob", "counter": 7});
        let Value::Object(map) = persisted else { unreachable!() };
        merge_persisted(&mut state, map);
        assert_eq!(state, json!({"counter": 7, "user": {"name": "Bob", "age": 30}, "theme": "light"}));
    }

    #[test]
    fn merge_persisted_creates_paths_missing_from_initial() {
        let mut state = json!({"a": 1});
        let Value::Object(map) = json!({"b.c": true}) else { unreachable!() };
        merge_persisted(&mut state, map);
        assert_eq!(state, json!({"a": 1, "b": {"c": true}}));
    }

    #[test]
    fn merge_persisted_whole_state_keeps_new_defaults() {
        let mut state = json!({"settings": {"theme": "light", "font": 12}});
        let Value::Object(map) = json!({"settings": {"theme": "dark"}}) else { unreachable!() };
        merge_persisted(&mut state, map);
        assert_eq!(state, json!({"settings": {"theme": "dark", "font": 12}}));
    }
}
