//! Configuration value providers.
//!
//! Keys are addressed by a namespace path plus a field name. The full key is
//! the path joined with `__` (e.g. `destination__filesystem__bucket_url`).

use serde_json::{Map, Value};

pub const KEY_SEPARATOR: &str = "__";

/// Source of raw configuration values.
pub trait ConfigProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Look up `key` under `namespaces`. Returns the value (if any) and the
    /// full key that was consulted, for diagnostics.
    fn get_value(&self, key: &str, namespaces: &[&str]) -> (Option<String>, String);

    /// Whether this provider may hold secret values.
    fn supports_secrets(&self) -> bool;
}

pub fn full_key(key: &str, namespaces: &[&str]) -> String {
    let mut parts: Vec<&str> = namespaces.to_vec();
    parts.push(key);
    parts.join(KEY_SEPARATOR)
}

// ============================================================================
// Environment
// ============================================================================

/// Reads upper-cased keys from the process environment,
/// e.g. `LOAD__WORKERS` or `DESTINATION__FILESYSTEM__BUCKET_URL`.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentProvider {
    prefix: Option<String>,
}

impl EnvironmentProvider {
    pub fn new() -> Self {
        Self { prefix: None }
    }

    /// Only read variables starting with `PREFIX__`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn env_key(&self, key: &str, namespaces: &[&str]) -> String {
        let key = full_key(key, namespaces).to_uppercase();
        match &self.prefix {
            Some(prefix) => format!("{}{}{}", prefix.to_uppercase(), KEY_SEPARATOR, key),
            None => key,
        }
    }
}

impl ConfigProvider for EnvironmentProvider {
    fn name(&self) -> &str {
        "Environment Variables"
    }

    fn get_value(&self, key: &str, namespaces: &[&str]) -> (Option<String>, String) {
        let env_key = self.env_key(key, namespaces);
        (std::env::var(&env_key).ok(), env_key)
    }

    fn supports_secrets(&self) -> bool {
        true
    }
}

// ============================================================================
// Dictionary
// ============================================================================

/// In-memory nested values. Used for programmatic configuration and tests.
#[derive(Debug, Clone, Default)]
pub struct DictionaryProvider {
    values: Map<String, Value>,
}

impl DictionaryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object. Non-object values yield an empty provider.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(values) => Self { values },
            _ => Self::default(),
        }
    }

    /// Set `key` under `namespaces`, creating intermediate tables.
    pub fn set(&mut self, namespaces: &[&str], key: &str, value: impl Into<Value>) {
        let mut node = &mut self.values;
        for ns in namespaces {
            let entry = node
                .entry(ns.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            node = match entry {
                Value::Object(map) => map,
                _ => return,
            };
        }
        node.insert(key.to_string(), value.into());
    }

    pub fn with(mut self, namespaces: &[&str], key: &str, value: impl Into<Value>) -> Self {
        self.set(namespaces, key, value);
        self
    }
}

impl ConfigProvider for DictionaryProvider {
    fn name(&self) -> &str {
        "Dictionary Provider"
    }

    fn get_value(&self, key: &str, namespaces: &[&str]) -> (Option<String>, String) {
        let full = full_key(key, namespaces);
        let mut path = namespaces.iter().copied().chain(std::iter::once(key));

        let first = match path.next() {
            Some(first) => first,
            None => return (None, full),
        };
        let mut node = match self.values.get(first) {
            Some(node) => node,
            None => return (None, full),
        };
        for part in path {
            node = match node.get(part) {
                Some(next) => next,
                None => return (None, full),
            };
        }

        let value = match node {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => Some(
                items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            other => Some(other.to_string()),
        };
        (value, full)
    }

    fn supports_secrets(&self) -> bool {
        true
    }
}
