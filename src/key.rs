//! Binding keys
//!
//! A key is a namespaced string such as `services.UserService`. A key may
//! carry a deep property path after `#` (`config.app#server.port`) that
//! addresses a nested property of the value resolved for the base key.

use crate::error::{ContextError, Result};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

/// Separator between the base key and the deep property path.
pub const PROPERTY_SEPARATOR: char = '#';

/// Suffix of the key holding configuration for another binding.
pub const CONFIG_SUFFIX: &str = ".config";

/// Typed, immutable key addressing a bound value.
///
/// The type parameter is only a marker for the value type; the key itself is
/// just the string (and optional path).
pub struct BindingKey<T: ?Sized = ()> {
    key: Arc<str>,
    path: Option<Arc<str>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ?Sized> BindingKey<T> {
    /// Create a key, validating it.
    ///
    /// A raw key of the form `ns.name#path.to.prop` is split into the base
    /// key `ns.name` and the path `path.to.prop`.
    pub fn create(key: impl AsRef<str>) -> Result<Self> {
        let raw = key.as_ref();
        let (base, path) = match raw.split_once(PROPERTY_SEPARATOR) {
            Some((base, path)) => (base, Some(path)),
            None => (raw, None),
        };
        Self::with_path(base, path)
    }

    /// Create a key from a base key and an optional property path.
    pub fn with_path(key: impl AsRef<str>, path: Option<&str>) -> Result<Self> {
        let key = key.as_ref();
        validate_base(key)?;
        let path = match path {
            Some(p) => {
                validate_path(key, p)?;
                Some(Arc::from(p))
            }
            None => None,
        };
        Ok(Self {
            key: Arc::from(key),
            path,
            _marker: PhantomData,
        })
    }

    /// Build the key of the configuration binding for `key`.
    pub fn config_of(key: impl AsRef<str>) -> Result<Self> {
        let base = key.as_ref();
        validate_base(base)?;
        Self::with_path(format!("{base}{CONFIG_SUFFIX}"), None)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Address a nested property of the value bound to this key.
    ///
    /// Appends to an existing path.
    pub fn deep_property<U>(&self, path: &str) -> Result<BindingKey<U>> {
        let joined = match &self.path {
            Some(existing) if !existing.is_empty() && !path.is_empty() => format!("{existing}.{path}"),
            Some(existing) if path.is_empty() => existing.to_string(),
            Some(_) | None => path.to_string(),
        };
        BindingKey::with_path(&*self.key, Some(&joined))
    }

    /// The key without its property path.
    pub fn base(&self) -> BindingKey<()> {
        BindingKey {
            key: Arc::clone(&self.key),
            path: None,
            _marker: PhantomData,
        }
    }

    /// Drop the type marker.
    pub fn erase(&self) -> BindingKey<()> {
        self.retype()
    }

    pub(crate) fn retype<U: ?Sized>(&self) -> BindingKey<U> {
        BindingKey {
            key: Arc::clone(&self.key),
            path: self.path.clone(),
            _marker: PhantomData,
        }
    }
}

fn validate_base(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(ContextError::invalid_key(key, "binding key must not be empty"));
    }
    if key.contains(PROPERTY_SEPARATOR) {
        return Err(ContextError::invalid_key(
            key,
            format!("binding key cannot contain '{PROPERTY_SEPARATOR}'"),
        ));
    }
    if key.chars().any(char::is_whitespace) {
        return Err(ContextError::invalid_key(
            key,
            "binding key cannot contain whitespace",
        ));
    }
    Ok(())
}

fn validate_path(key: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        // `key#` addresses the whole value
        return Ok(());
    }
    if path.contains(PROPERTY_SEPARATOR) {
        return Err(ContextError::invalid_key(
            format!("{key}{PROPERTY_SEPARATOR}{path}"),
            format!("property path cannot contain '{PROPERTY_SEPARATOR}'"),
        ));
    }
    if path.split('.').any(str::is_empty) {
        return Err(ContextError::invalid_key(
            format!("{key}{PROPERTY_SEPARATOR}{path}"),
            "property path has an empty segment",
        ));
    }
    Ok(())
}

impl<T: ?Sized> Clone for BindingKey<T> {
    fn clone(&self) -> Self {
        self.retype()
    }
}

impl<T: ?Sized> PartialEq for BindingKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.path == other.path
    }
}

impl<T: ?Sized> Eq for BindingKey<T> {}

impl<T: ?Sized> Hash for BindingKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.path.hash(state);
    }
}

impl<T: ?Sized> fmt::Display for BindingKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}{PROPERTY_SEPARATOR}{}", self.key, path),
            None => f.write_str(&self.key),
        }
    }
}

impl<T: ?Sized> fmt::Debug for BindingKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BindingKey({self})")
    }
}

/// Anything that can be turned into a key at the call site.
///
/// Strings are parsed (and may fail); typed keys pass through.
pub trait IntoBindingKey<T: ?Sized> {
    fn into_binding_key(self) -> Result<BindingKey<T>>;
}

impl<T: ?Sized> IntoBindingKey<T> for BindingKey<T> {
    fn into_binding_key(self) -> Result<BindingKey<T>> {
        Ok(self)
    }
}

impl<T: ?Sized> IntoBindingKey<T> for &BindingKey<T> {
    fn into_binding_key(self) -> Result<BindingKey<T>> {
        Ok(self.clone())
    }
}

impl<T: ?Sized> IntoBindingKey<T> for &str {
    fn into_binding_key(self) -> Result<BindingKey<T>> {
        BindingKey::create(self)
    }
}

impl<T: ?Sized> IntoBindingKey<T> for String {
    fn into_binding_key(self) -> Result<BindingKey<T>> {
        BindingKey::create(self)
    }
}

impl<T: ?Sized> IntoBindingKey<T> for &String {
    fn into_binding_key(self) -> Result<BindingKey<T>> {
        BindingKey::create(self)
    }
}

/// Untyped counterpart of [`IntoBindingKey`] for operations that never look
/// at the value type (bind, unbind, lookups).
pub trait AsBindingKey {
    fn as_binding_key(self) -> Result<BindingKey<()>>;
}

impl<T: ?Sized> AsBindingKey for BindingKey<T> {
    fn as_binding_key(self) -> Result<BindingKey<()>> {
        Ok(self.erase())
    }
}

impl<T: ?Sized> AsBindingKey for &BindingKey<T> {
    fn as_binding_key(self) -> Result<BindingKey<()>> {
        Ok(self.erase())
    }
}

impl AsBindingKey for &str {
    fn as_binding_key(self) -> Result<BindingKey<()>> {
        BindingKey::create(self)
    }
}

impl AsBindingKey for String {
    fn as_binding_key(self) -> Result<BindingKey<()>> {
        BindingKey::create(self)
    }
}

impl AsBindingKey for &String {
    fn as_binding_key(self) -> Result<BindingKey<()>> {
        BindingKey::create(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_with_path() {
        let key = BindingKey::<()>::create("ns.name#path.to.prop").unwrap();
        assert_eq!(key.key(), "ns.name");
        assert_eq!(key.path(), Some("path.to.prop"));
        assert_eq!(key.to_string(), "ns.name#path.to.prop");
    }

    #[test]
    fn test_plain_key_has_no_path() {
        let key = BindingKey::<String>::create("services.Foo").unwrap();
        assert_eq!(key.key(), "services.Foo");
        assert_eq!(key.path(), None);
    }

    #[test]
    fn test_rejects_malformed_keys() {
        assert!(BindingKey::<()>::create("").is_err());
        assert!(BindingKey::<()>::create("a#b#c").is_err());
        assert!(BindingKey::<()>::create("a#b..c").is_err());
        assert!(BindingKey::<()>::create("a b").is_err());
        assert!(BindingKey::<()>::with_path("a#b", None).is_err());
    }

    #[test]
    fn test_deep_property_appends() {
        let key = BindingKey::<()>::create("app.config").unwrap();
        let port: BindingKey<u16> = key
            .deep_property::<()>("server")
            .unwrap()
            .deep_property("port")
            .unwrap();
        assert_eq!(port.key(), "app.config");
        assert_eq!(port.path(), Some("server.port"));
    }

    #[test]
    fn test_deep_property_on_empty_path() {
        let key = BindingKey::<()>::create("a#").unwrap();
        assert_eq!(key.path(), Some(""));
        let nested: BindingKey<()> = key.deep_property("x").unwrap();
        assert_eq!(nested.key(), "a");
        assert_eq!(nested.path(), Some("x"));
    }

    #[test]
    fn test_config_key() {
        let key = BindingKey::<()>::config_of("servers.rest").unwrap();
        assert_eq!(key.key(), "servers.rest.config");
        assert!(BindingKey::<()>::config_of("a#b").is_err());
    }
}
