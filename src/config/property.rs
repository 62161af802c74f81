use crate::binding::BoundValue;
use crate::error::{ContextError, Result};
use serde_json::Value;
use std::sync::Arc;

/// Walk a dot-separated path through JSON objects and arrays.
///
/// Array elements are addressed by their index (`servers.0.port`).
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Resolve `path` inside a value bound to `key`.
///
/// Only `serde_json::Value` can be navigated; the selected property is
/// returned as a new `serde_json::Value`.
pub(crate) fn deep_property(
    key: &str,
    value: &BoundValue,
    path: &str,
    optional: bool,
) -> Result<Option<BoundValue>> {
    let Some(json) = value.downcast_ref::<Value>() else {
        return Err(ContextError::type_mismatch::<Value>(key));
    };
    match lookup(json, path) {
        Some(found) => Ok(Some(Arc::new(found.clone()) as BoundValue)),
        None if optional => Ok(None),
        None => Err(ContextError::PropertyNotFound {
            key: key.to_string(),
            path: path.to_string(),
        }),
    }
}
