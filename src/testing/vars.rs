//! Variable store and `{{placeholder}}` interpolation
//!
//! Placeholders name a stored key, optionally followed by a dotted path into
//! the stored JSON (`{{login.body.token}}`, `{{items.0.id}}`). Unresolved
//! placeholders are left untouched so templates can be filled in stages.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_-]*(?:\.[A-Za-z0-9_-]+)*)\s*\}\}")
        .expect("placeholder pattern is valid")
});

/// Slot that always holds the most recent successful response
pub const LAST_RESPONSE: &str = "last_response";

/// Values captured during one test execution
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    values: HashMap<String, Value>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Resolve `key.path.to.value`
    pub fn resolve(&self, reference: &str) -> Option<&Value> {
        let (key, path) = match reference.split_once('.') {
            Some((key, path)) => (key, Some(path)),
            None => (reference, None),
        };
        let root = self.values.get(key)?;
        match path {
            Some(path) => lookup_path(root, path),
            None => Some(root),
        }
    }

    /// Substitute placeholders in a string
    pub fn interpolate_str(&self, template: &str) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures| match self.resolve(&caps[1]) {
                Some(value) => stringify(value),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Deep copy of `value` with placeholders substituted in every string
    pub fn interpolate(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.interpolate_str(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.interpolate(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.interpolate(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Substitute placeholders in every value of a string map
    pub fn interpolate_map(&self, map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate_str(v)))
            .collect()
    }
}

/// Strings are inserted raw, everything else as compact JSON
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Walk a dotted path through objects (by key) and arrays (by index)
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
