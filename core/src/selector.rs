//! Path selectors with optional aliases (`user.profile.name:displayName`).
//!
//! A selection maps each alias, or the path's last segment when no alias is
//! given, to the value currently found at the path. Absent paths select
//! `null`. Selections are compared shallowly so watchers only fire when one
//! of the selected values actually changed.

use std::fmt;

use serde_json::{Map, Value};

use crate::path::{get_last_part, get_nested_value};

/// Separator between a path and its alias.
pub const ALIAS_SEPARATOR: char = ':';

/// A parsed `path[:alias]` selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub path: String,
    pub alias: String,
}

impl Selector {
    /// Parse `path` or `path:alias`. An empty alias falls back to the last
    /// path segment.
    pub fn parse(input: &str) -> Self {
        let (path, alias) = match input.split_once(ALIAS_SEPARATOR) {
            Some((path, alias)) if !alias.is_empty() => (path, alias),
            Some((path, _)) => (path, get_last_part(path)),
            None => (input, get_last_part(input)),
        };
        Selector {
            path: path.to_string(),
            alias: alias.to_string(),
        }
    }

    pub fn parse_all<S: AsRef<str>>(inputs: &[S]) -> Vec<Selector> {
        inputs.iter().map(|s| Selector::parse(s.as_ref())).collect()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.path, ALIAS_SEPARATOR, self.alias)
    }
}

/// Evaluate selectors against a state tree.
///
/// Later selectors win when two share an alias.
pub fn select(state: &Value, selectors: &[Selector]) -> Map<String, Value> {
    let mut out = Map::new();
    for selector in selectors {
        let value = get_nested_value(state, &selector.path)
            .cloned()
            .unwrap_or(Value::Null);
        out.insert(selector.alias.clone(), value);
    }
    out
}

/// Same key set, and each key's value compares equal.
pub fn shallow_equal(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_plain_path_uses_last_part() {
        let s = Selector::parse("user.profile.name");
        assert_eq!(s.path, "user.profile.name");
        assert_eq!(s.alias, "name");
    }

    #[test]
    fn parse_with_alias() {
        let s = Selector::parse("user.profile.name:displayName");
        assert_eq!(s.path, "user.profile.name");
        assert_eq!(s.alias, "displayName");
    }

    #[test]
    fn parse_empty_alias_falls_back() {
        let s = Selector::parse("user.age:");
        assert_eq!(s.alias, "age");
    }

    #[test]
    fn display_round_trips() {
        let s = Selector::parse("a.b:c");
        assert_eq!(Selector::parse(&s.to_string()), s);
    }

    #[test]
    fn select_aliases_and_last_parts() {
        let state = json!({"user": {"name": "X"}, "counter": 5});
        let selected = select(&state, &Selector::parse_all(&["user.name:name", "counter"]));
        assert_eq!(Value::Object(selected), json!({"name": "X", "counter": 5}));
    }

    #[test]
    fn select_missing_is_null() {
        let state = json!({"a": 1});
        let selected = select(&state, &Selector::parse_all(&["b.c"]));
        assert_eq!(selected.get("c"), Some(&Value::Null));
    }

    #[test]
    fn shallow_equal_compares_each_key() {
        let state = json!({"a": 1, "b": {"deep": true}});
        let selectors = Selector::parse_all(&["a", "b"]);
        let first = select(&state, &selectors);
        let second = select(&state.clone(), &selectors);
        assert!(shallow_equal(&first, &second));

        let changed = select(&json!({"a": 2, "b": {"deep": true}}), &selectors);
        assert!(!shallow_equal(&first, &changed));
    }

    #[test]
    fn shallow_equal_detects_key_set_change() {
        let mut a = Map::new();
        a.insert("x".into(), json!(1));
        let mut b = a.clone();
        b.insert("y".into(), json!(2));
        assert!(!shallow_equal(&a, &b));
        assert!(!shallow_equal(&b, &a));
    }
}
