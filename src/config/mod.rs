//! Configuration bindings
//!
//! The configuration of a binding `k` lives at `k.config` and is usually a
//! `serde_json::Value`. Deep properties address parts of it:
//! `k.config#rest.port`.

mod env;
mod property;

pub use env::EnvConfigLoader;
pub use property::lookup;
pub(crate) use property::deep_property;

use crate::binding::Binding;
use crate::context::Context;
use crate::error::Result;
use crate::key::{AsBindingKey, BindingKey};
use crate::resolution::ResolutionOptions;
use std::sync::Arc;

impl Context {
    /// Bind the configuration of `key` (the binding at `<key>.config`).
    pub fn configure(&self, key: impl AsBindingKey) -> Result<Binding> {
        let key = key.as_binding_key()?;
        self.bind(BindingKey::<()>::config_of(key.key())?)
    }

    /// The configuration of `key` at `path`; `None` when nothing is
    /// configured there.
    pub async fn get_config<T: Send + Sync + 'static>(
        &self,
        key: impl AsBindingKey,
        path: &str,
    ) -> Result<Option<Arc<T>>> {
        let key = config_key::<T>(key, path)?;
        self.get_with(key, ResolutionOptions::optional()).await
    }

    pub fn get_config_sync<T: Send + Sync + 'static>(
        &self,
        key: impl AsBindingKey,
        path: &str,
    ) -> Result<Option<Arc<T>>> {
        let key = config_key::<T>(key, path)?;
        self.get_sync_with(key, ResolutionOptions::optional())
    }
}

fn config_key<T>(key: impl AsBindingKey, path: &str) -> Result<BindingKey<T>> {
    let key = key.as_binding_key()?;
    BindingKey::<T>::config_of(key.key())?.deep_property::<T>(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_config_resolution() {
        let ctx = Context::new();
        ctx.configure("servers.rest")
            .unwrap()
            .to(json!({ "port": 3000, "cors": { "origin": "*" } }))
            .unwrap();

        let origin = ctx
            .get_config::<serde_json::Value>("servers.rest", "cors.origin")
            .await
            .unwrap();
        assert_eq!(origin.as_deref(), Some(&json!("*")));

        let whole = ctx
            .get_config_sync::<serde_json::Value>("servers.rest", "")
            .unwrap()
            .unwrap();
        assert_eq!(whole["port"], 3000);

        let missing = ctx
            .get_config_sync::<serde_json::Value>("servers.rest", "tls")
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_unconfigured_key_yields_none() {
        let ctx = Context::new();
        let value = ctx
            .get_config_sync::<serde_json::Value>("servers.grpc", "port")
            .unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_child_overrides_config() {
        let app = Context::new();
        app.configure("db").unwrap().to(json!({ "pool": 5 })).unwrap();
        let request = app.create_child("request");
        request.configure("db").unwrap().to(json!({ "pool": 1 })).unwrap();

        let pool = request
            .get_config_sync::<serde_json::Value>("db", "pool")
            .unwrap()
            .unwrap();
        assert_eq!(*pool, json!(1));
    }
}
