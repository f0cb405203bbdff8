//! Typed access into loosely-shaped JSON plan documents.
//!
//! Terraform plan JSON is treated as untrusted input. Every lookup goes
//! through [`Probe`], which keeps "key absent", "explicit null", and
//! "present but the wrong type" apart so callers can decide which of
//! those cases is an error and which is simply an empty result.

use serde_json::{Map, Value};

/// Outcome of looking up a key and checking its JSON type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Probe<T> {
    /// The key does not exist, or the parent is not an object.
    Absent,
    /// The key exists and holds `null`.
    Null,
    /// The key exists but holds a value of another type.
    WrongType(&'static str),
    /// The key exists and holds the expected type.
    Found(T),
}

impl<T> Probe<T> {
    /// Collapse to `Option`, treating absent, null, and wrong-type alike.
    pub fn found(self) -> Option<T> {
        match self {
            Probe::Found(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Probe::Found(_))
    }
}

/// Name of a JSON value's type, for diagnostics.
pub fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn lookup<'a, T>(
    parent: &'a Value,
    key: &str,
    extract: impl FnOnce(&'a Value) -> Option<T>,
) -> Probe<T> {
    match parent.as_object().and_then(|m| m.get(key)) {
        None => Probe::Absent,
        Some(Value::Null) => Probe::Null,
        Some(v) => match extract(v) {
            Some(t) => Probe::Found(t),
            None => Probe::WrongType(kind(v)),
        },
    }
}

/// Look up `key` and require an object.
pub fn object<'a>(parent: &'a Value, key: &str) -> Probe<&'a Map<String, Value>> {
    lookup(parent, key, Value::as_object)
}

/// Look up `key` and require an array.
pub fn array<'a>(parent: &'a Value, key: &str) -> Probe<&'a Vec<Value>> {
    lookup(parent, key, Value::as_array)
}

/// Look up `key` and require a string.
pub fn string<'a>(parent: &'a Value, key: &str) -> Probe<&'a str> {
    lookup(parent, key, Value::as_str)
}

/// Look up `key` with no type requirement beyond "not null".
pub fn any<'a>(parent: &'a Value, key: &str) -> Probe<&'a Value> {
    lookup(parent, key, Some)
}

/// Follow a path of object keys, returning the value at the end.
pub fn path<'a>(root: &'a Value, keys: &[&str]) -> Probe<&'a Value> {
    let mut current = root;
    for key in keys {
        match any(current, key) {
            Probe::Found(v) => current = v,
            Probe::Absent => return Probe::Absent,
            Probe::Null => return Probe::Null,
            Probe::WrongType(k) => return Probe::WrongType(k),
        }
    }
    Probe::Found(current)
}

/// A string field that is present and non-empty.
pub fn non_empty_string<'a>(parent: &'a Value, key: &str) -> Option<&'a str> {
    string(parent, key).found().filter(|s| !s.is_empty())
}

/// Collect every string leaf under `value`, descending through arrays and
/// objects up to `max_depth` levels.
///
/// Returns `false` if the depth limit cut the walk short.
pub fn collect_strings<'a>(value: &'a Value, max_depth: usize, out: &mut Vec<&'a str>) -> bool {
    fn walk<'a>(value: &'a Value, depth: usize, max_depth: usize, out: &mut Vec<&'a str>) -> bool {
        if depth > max_depth {
            return false;
        }
        match value {
            Value::String(s) => {
                out.push(s);
                true
            }
            Value::Array(items) => items
                .iter()
                .all(|item| walk(item, depth + 1, max_depth, out)),
            Value::Object(map) => map.values().all(|v| walk(v, depth + 1, max_depth, out)),
            _ => true,
        }
    }
    walk(value, 0, max_depth, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_null_and_wrong_type_are_distinct() {
        let v = json!({"a": null, "b": 3, "c": "x"});
        assert_eq!(string(&v, "missing"), Probe::Absent);
        assert_eq!(string(&v, "a"), Probe::Null);
        assert_eq!(string(&v, "b"), Probe::WrongType("number"));
        assert_eq!(string(&v, "c"), Probe::Found("x"));
    }

    #[test]
    fn test_lookup_on_non_object_is_absent() {
        let v = json!([1, 2]);
        assert_eq!(any(&v, "a"), Probe::Absent);
    }

    #[test]
    fn test_path_stops_at_first_gap() {
        let v = json!({"configuration": {"root_module": {"resources": []}}});
        assert!(path(&v, &["configuration", "root_module"]).is_found());
        assert_eq!(path(&v, &["configuration", "nope", "x"]), Probe::Absent);
        assert_eq!(
            path(&v, &["configuration", "root_module", "resources", "x"]),
            Probe::Absent
        );
    }

    #[test]
    fn test_non_empty_string_rejects_empty() {
        let v = json!({"timestamp": ""});
        assert_eq!(non_empty_string(&v, "timestamp"), None);
    }

    #[test]
    fn test_collect_strings_respects_depth() {
        let v = json!({"a": ["x", {"b": "y"}], "n": 1});
        let mut out = Vec::new();
        assert!(collect_strings(&v, 8, &mut out));
        out.sort();
        assert_eq!(out, vec!["x", "y"]);

        let mut shallow = Vec::new();
        assert!(!collect_strings(&v, 1, &mut shallow));
    }
}
