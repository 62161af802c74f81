use super::{ResolutionSession, ValueOrPromise};
use crate::binding::{Binding, BoundValue};
use crate::context::Context;
use crate::error::{ContextError, Result};
use crate::key::{BindingKey, IntoBindingKey};
use std::sync::Arc;

/// Options for a single resolution call.
#[derive(Debug, Clone, Default)]
pub struct ResolutionOptions {
    /// Yield `None` instead of `BindingNotFound` for an unbound key.
    pub optional: bool,
    /// Continue an existing session instead of starting a new one.
    pub session: Option<ResolutionSession>,
}

impl ResolutionOptions {
    pub fn optional() -> Self {
        Self {
            optional: true,
            session: None,
        }
    }

    pub fn with_session(mut self, session: ResolutionSession) -> Self {
        self.session = Some(session);
        self
    }
}

/// What a factory sees while its binding is being resolved.
///
/// Lookups made through it continue the current resolution session, so a
/// factory that asks for its own key (directly or transitively) fails with
/// `CircularDependency` instead of recursing.
#[derive(Clone)]
pub struct ResolutionContext {
    context: Context,
    binding: Binding,
    session: ResolutionSession,
}

impl ResolutionContext {
    pub(crate) fn new(context: Context, binding: Binding, session: ResolutionSession) -> Self {
        Self {
            context,
            binding,
            session,
        }
    }

    /// The context the value is resolved from.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The binding being resolved.
    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn session(&self) -> &ResolutionSession {
        &self.session
    }

    pub fn get_value_or_promise(
        &self,
        key: &BindingKey<()>,
        optional: bool,
    ) -> Result<ValueOrPromise<Option<BoundValue>>> {
        let mut session = self.session.clone();
        self.context.resolve_in_session(key, optional, &mut session)
    }

    pub fn get_sync<T: Send + Sync + 'static>(&self, key: impl IntoBindingKey<T>) -> Result<Arc<T>> {
        let key = key.into_binding_key()?;
        self.get_value_or_promise(&key.erase(), false)?
            .into_sync(key.key())?
            .map(|v| downcast(&key, v))
            .unwrap_or_else(|| Err(self.missing(&key)))
    }

    pub fn get_optional_sync<T: Send + Sync + 'static>(
        &self,
        key: impl IntoBindingKey<T>,
    ) -> Result<Option<Arc<T>>> {
        let key = key.into_binding_key()?;
        self.get_value_or_promise(&key.erase(), true)?
            .into_sync(key.key())?
            .map(|v| downcast(&key, v))
            .transpose()
    }

    pub async fn get<T: Send + Sync + 'static>(&self, key: impl IntoBindingKey<T>) -> Result<Arc<T>> {
        let key = key.into_binding_key()?;
        match self.get_value_or_promise(&key.erase(), false)?.resolve().await? {
            Some(v) => downcast(&key, v),
            None => Err(self.missing(&key)),
        }
    }

    pub async fn get_optional<T: Send + Sync + 'static>(
        &self,
        key: impl IntoBindingKey<T>,
    ) -> Result<Option<Arc<T>>> {
        let key = key.into_binding_key()?;
        self.get_value_or_promise(&key.erase(), true)?
            .resolve()
            .await?
            .map(|v| downcast(&key, v))
            .transpose()
    }

    /// Configuration of the binding being resolved, at `path`.
    pub fn config_sync<T: Send + Sync + 'static>(&self, path: &str) -> Result<Option<Arc<T>>> {
        let key = BindingKey::<T>::config_of(self.binding.key().key())?.deep_property::<T>(path)?;
        self.get_optional_sync(key)
    }

    fn missing<T>(&self, key: &BindingKey<T>) -> ContextError {
        ContextError::not_found(key.to_string(), self.context.name(), self.session.binding_path())
    }
}

fn downcast<T: Send + Sync + 'static>(key: &BindingKey<T>, value: BoundValue) -> Result<Arc<T>> {
    value
        .downcast::<T>()
        .map_err(|_| ContextError::type_mismatch::<T>(key.to_string()))
}

impl std::fmt::Debug for ResolutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionContext")
            .field("context", &self.context.name())
            .field("binding", &self.binding.key().to_string())
            .field("path", &self.session.resolution_path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::context::Context;
    use crate::error::ContextError;

    #[test]
    fn test_factory_lookup_continues_session() {
        let ctx = Context::new();
        ctx.bind("a")
            .unwrap()
            .to_dynamic_value(|rc| Ok(*rc.get_sync::<u32>("b")? + 1))
            .unwrap();
        ctx.bind("b")
            .unwrap()
            .to_dynamic_value(|rc| Ok(*rc.get_sync::<u32>("a")? + 1))
            .unwrap();

        let err = ctx.get_sync::<u32>("a").unwrap_err();
        assert!(matches!(
            err,
            ContextError::CircularDependency { chain } if chain == vec!["a", "b", "a"]
        ));
    }

    #[test]
    fn test_factory_sees_its_binding() {
        let ctx = Context::new();
        ctx.bind("who")
            .unwrap()
            .to_dynamic_value(|rc| Ok(rc.binding().key().to_string()))
            .unwrap();
        assert_eq!(*ctx.get_sync::<String>("who").unwrap(), "who");
    }

    #[test]
    fn test_factory_reads_own_config() {
        let ctx = Context::new();
        ctx.configure("servers.rest")
            .unwrap()
            .to(serde_json::json!({ "port": 3000 }))
            .unwrap();
        ctx.bind("servers.rest")
            .unwrap()
            .to_dynamic_value(|rc| {
                let port = rc.config_sync::<serde_json::Value>("port")?;
                Ok(port.and_then(|p| p.as_u64()).unwrap_or(80))
            })
            .unwrap();
        assert_eq!(*ctx.get_sync::<u64>("servers.rest").unwrap(), 3000);
    }
}
