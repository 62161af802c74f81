use crate::binding::Binding;
use crate::context::Context;
use crate::error::Result;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::env;
use std::sync::Arc;

/// Separator for nesting inside one variable name: `APP_REST__PORT`.
const NESTING_SEPARATOR: &str = "__";

/// Configuration read from environment variables.
///
/// Variables starting with the prefix are collected; the rest of the name is
/// split on `__` into lower-case nested properties, so with the prefix
/// `APP_`, `APP_REST__PORT=3000` becomes `{"rest": {"port": 3000}}`.
/// Values parse as JSON when they can and stay strings otherwise.
#[derive(Clone, Debug)]
pub struct EnvConfigLoader {
    prefix: String,
    values: Arc<DashMap<String, String>>,
}

impl EnvConfigLoader {
    /// An empty loader; call [`EnvConfigLoader::load`] to read the process
    /// environment.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            values: Arc::new(DashMap::new()),
        }
    }

    /// A loader holding the current process environment.
    pub fn from_env(prefix: impl Into<String>) -> Self {
        let loader = Self::new(prefix);
        loader.load();
        loader
    }

    /// Read the process environment. Returns how many variables matched.
    pub fn load(&self) -> usize {
        let mut loaded = 0;
        for (name, value) in env::vars() {
            if self.set(&name, &value) {
                loaded += 1;
            }
        }
        tracing::debug!(prefix = %self.prefix, loaded, "environment configuration loaded");
        loaded
    }

    /// Record one variable. Names without the prefix are ignored.
    pub fn set(&self, name: &str, value: &str) -> bool {
        match name.strip_prefix(&self.prefix) {
            Some(rest) if !rest.is_empty() => {
                self.values.insert(rest.to_string(), value.to_string());
                true
            }
            _ => false,
        }
    }

    /// Raw value of a variable, by its name without the prefix.
    pub fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).map(|v| v.clone())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The collected variables as a nested JSON object.
    pub fn to_json(&self) -> Value {
        let mut entries: Vec<(String, String)> = self
            .values
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        // deterministic result when a scalar and an object collide
        entries.sort();

        let mut root = Map::new();
        for (name, raw) in entries {
            let segments: Vec<String> = name
                .split(NESTING_SEPARATOR)
                .map(str::to_lowercase)
                .collect();
            insert_nested(&mut root, &segments, parse_value(&raw));
        }
        Value::Object(root)
    }

    /// Bind the collected configuration as the configuration of `key`.
    pub fn bind_to(&self, ctx: &Context, key: &str) -> Result<Binding> {
        ctx.configure(key)?.to(self.to_json())
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn insert_nested(map: &mut Map<String, Value>, segments: &[String], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        map.insert(first.clone(), value);
        return;
    }
    let child = map
        .entry(first.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if !child.is_object() {
        tracing::warn!(property = %first, "environment variable overrides a scalar with a nested value");
        *child = Value::Object(Map::new());
    }
    if let Value::Object(child) = child {
        insert_nested(child, rest, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nesting_and_parsing() {
        let loader = EnvConfigLoader::new("APP_");
        assert!(loader.set("APP_REST__PORT", "3000"));
        assert!(loader.set("APP_REST__HOST", "localhost"));
        assert!(loader.set("APP_DEBUG", "true"));
        assert!(!loader.set("OTHER_VAR", "x"));
        assert!(!loader.set("APP_", "x"));

        assert_eq!(loader.get("DEBUG").as_deref(), Some("true"));
        assert_eq!(
            loader.to_json(),
            json!({ "rest": { "port": 3000, "host": "localhost" }, "debug": true })
        );
    }

    #[test]
    fn test_bind_to_context() {
        let ctx = Context::new();
        let loader = EnvConfigLoader::new("SVC_");
        loader.set("SVC_TIMEOUT", "30");
        loader.bind_to(&ctx, "services.http").unwrap();

        let timeout = ctx
            .get_config_sync::<serde_json::Value>("services.http", "timeout")
            .unwrap()
            .unwrap();
        assert_eq!(*timeout, json!(30));
    }
}
