use super::source::{BindingSource, SourceFn};
use super::{BindingScope, BindingType, BoundValue};
use crate::context::{Context, ContextEventKind, ContextInner};
use crate::error::{ContextError, Result};
use crate::inject::{self, Injectable, Provider, ValueFactory};
use crate::key::{AsBindingKey, BindingKey};
use crate::lifecycle::{self, Dispose, DisposeHook};
use crate::resolution::{ResolutionContext, ResolutionSession, ValueCache, ValueOrPromise};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

/// A registration mapping a key to a resolution strategy.
///
/// `Binding` is a cheap handle; clones share the same registration. Builder
/// methods mutate it in place and hand back a handle for chaining:
///
/// ```
/// use bindery::{BindingScope, Context};
///
/// let ctx = Context::new();
/// ctx.bind("services.greeting")
///     .unwrap()
///     .tag("greeter")
///     .in_scope(BindingScope::Singleton)
///     .to(String::from("Hello"))
///     .unwrap();
///
/// assert_eq!(*ctx.get_sync::<String>("services.greeting").unwrap(), "Hello");
/// ```
#[derive(Clone)]
pub struct Binding {
    inner: Arc<BindingInner>,
}

struct BindingInner {
    id: u64,
    key: BindingKey<()>,
    state: RwLock<BindingState>,
    cache: Arc<ValueCache>,
    owner: RwLock<Option<Weak<ContextInner>>>,
}

#[derive(Default)]
struct BindingState {
    scope: BindingScope,
    tags: Vec<String>,
    source: Option<BindingSource>,
    locked: bool,
    disposer: Option<DisposeHook>,
}

impl Binding {
    /// Create a binding that does not belong to any context yet.
    ///
    /// Use [`Context::add`] to register it.
    pub fn create(key: impl AsBindingKey) -> Result<Self> {
        let key = key.as_binding_key()?;
        if key.path().is_some() {
            return Err(ContextError::invalid_key(
                key.to_string(),
                "a binding key cannot carry a property path",
            ));
        }
        Ok(Self {
            inner: Arc::new(BindingInner {
                id: NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed),
                key,
                state: RwLock::new(BindingState::default()),
                cache: ValueCache::new(),
                owner: RwLock::new(None),
            }),
        })
    }

    pub fn key(&self) -> &BindingKey<()> {
        &self.inner.key
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn scope(&self) -> BindingScope {
        self.read().scope
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.read().tags.clone()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.read().tags.iter().any(|t| t == tag)
    }

    /// `None` until one of the `to*` methods has been called.
    pub fn binding_type(&self) -> Option<BindingType> {
        self.read().source.as_ref().map(BindingSource::binding_type)
    }

    pub fn is_locked(&self) -> bool {
        self.read().locked
    }

    pub fn is_disposable(&self) -> bool {
        self.read().disposer.is_some()
    }

    /// The context this binding is registered in, if it is still alive.
    pub fn owner_context(&self) -> Option<Context> {
        self.owner_weak()
            .and_then(|w| w.upgrade())
            .map(Context::from_inner)
    }

    pub fn same_as(&self, other: &Binding) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn tag(&self, tag: impl Into<String>) -> Self {
        self.tag_many([tag])
    }

    pub fn tag_many<I, S>(&self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let changed = {
            let mut state = self.write();
            let mut changed = false;
            for tag in tags {
                let tag = tag.into();
                if !state.tags.contains(&tag) {
                    state.tags.push(tag);
                    changed = true;
                }
            }
            changed
        };
        if changed {
            self.notify_changed();
        }
        self.clone()
    }

    pub fn in_scope(&self, scope: BindingScope) -> Self {
        let changed = {
            let mut state = self.write();
            let changed = state.scope != scope;
            state.scope = scope;
            changed
        };
        if changed {
            self.inner.cache.clear();
            self.notify_changed();
        }
        self.clone()
    }

    /// Prevent the key from being rebound or unbound in its context.
    pub fn lock(&self) -> Self {
        self.write().locked = true;
        self.notify_changed();
        self.clone()
    }

    pub fn unlock(&self) -> Self {
        self.write().locked = false;
        self.notify_changed();
        self.clone()
    }

    /// Dispose cached values of this binding when their context closes.
    pub fn disposable<T: Dispose + 'static>(&self) -> Self {
        self.write().disposer = Some(lifecycle::dispose_hook::<T>());
        self.clone()
    }

    /// Bind to a constant value.
    pub fn to<T: Send + Sync + 'static>(&self, value: T) -> Result<Self> {
        self.set_source(BindingSource::Constant(Arc::new(value)))
    }

    /// Bind to a value that is already shared behind an `Arc`.
    pub fn to_shared<T: Send + Sync + 'static>(&self, value: Arc<T>) -> Result<Self> {
        self.set_source(BindingSource::Constant(value))
    }

    /// Bind to a synchronous factory invoked on every (uncached) resolution.
    pub fn to_dynamic_value<T, F>(&self, factory: F) -> Result<Self>
    where
        T: Send + Sync + 'static,
        F: Fn(&ResolutionContext) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let produce: SourceFn = Arc::new(move |binding, ctx, session| {
            let rc = ResolutionContext::new(ctx.clone(), binding.clone(), session.clone());
            let value = factory(&rc)
                .map_err(|e| ContextError::from_factory(binding.key().key(), e))?;
            Ok(ValueOrPromise::Value(Arc::new(value) as BoundValue))
        });
        self.set_source(BindingSource::DynamicValue {
            target: None,
            produce,
        })
    }

    /// Bind to an asynchronous factory. Values of this binding can only be
    /// obtained with `get`, never `get_sync`.
    pub fn to_async_dynamic_value<T, F, Fut>(&self, factory: F) -> Result<Self>
    where
        T: Send + Sync + 'static,
        F: Fn(ResolutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let produce: SourceFn = Arc::new(move |binding, ctx, session| {
            let rc = ResolutionContext::new(ctx.clone(), binding.clone(), session.clone());
            let key = binding.key().key().to_string();
            let fut = factory(rc);
            Ok(ValueOrPromise::from_future(async move {
                fut.await
                    .map(|v| Arc::new(v) as BoundValue)
                    .map_err(|e| ContextError::from_factory(&key, e))
            }))
        });
        self.set_source(BindingSource::DynamicValue {
            target: None,
            produce,
        })
    }

    /// Bind to a factory that decides per call whether it completes
    /// synchronously.
    pub fn to_value_or_promise<T, F>(&self, factory: F) -> Result<Self>
    where
        T: Send + Sync + 'static,
        F: Fn(&ResolutionContext) -> Result<ValueOrPromise<T>> + Send + Sync + 'static,
    {
        let produce: SourceFn = Arc::new(move |binding, ctx, session| {
            let rc = ResolutionContext::new(ctx.clone(), binding.clone(), session.clone());
            Ok(factory(&rc)?.map(|v| Arc::new(v) as BoundValue))
        });
        self.set_source(BindingSource::DynamicValue {
            target: None,
            produce,
        })
    }

    /// Bind to a value factory: a type whose static `value` method has its
    /// parameters injected.
    pub fn to_value_factory<F: ValueFactory>(&self) -> Result<Self> {
        let metadata = F::metadata()?;
        self.set_source(BindingSource::DynamicValue {
            target: Some(std::any::type_name::<F>()),
            produce: inject::value_factory_source::<F>(metadata),
        })
    }

    /// Bind to a class; each resolution (subject to scope) constructs it with
    /// its declared injections resolved.
    pub fn to_class<C: Injectable>(&self) -> Result<Self> {
        let metadata = C::metadata()?;
        self.set_source(BindingSource::Class {
            target: std::any::type_name::<C>(),
            produce: inject::class_source::<C>(metadata),
        })
    }

    /// Bind to a provider; the provider is constructed with injection and its
    /// `value` method yields the bound value.
    pub fn to_provider<P: Provider>(&self) -> Result<Self> {
        let metadata = P::metadata()?;
        self.set_source(BindingSource::Provider {
            target: std::any::type_name::<P>(),
            produce: inject::provider_source::<P>(metadata),
        })
    }

    /// Redirect resolution to another key, which may carry a property path.
    pub fn to_alias(&self, target: impl AsBindingKey) -> Result<Self> {
        let target = target.as_binding_key()?;
        if target.key() == self.key().key() {
            return Err(ContextError::InvalidBindingTarget {
                key: self.key().to_string(),
                reason: "a binding cannot alias itself".to_string(),
            });
        }
        self.set_source(BindingSource::Alias(target))
    }

    fn set_source(&self, source: BindingSource) -> Result<Self> {
        let requested = source.binding_type();
        {
            let mut state = self.write();
            if let Some(existing) = state.source.as_ref().map(BindingSource::binding_type) {
                if existing != requested {
                    return Err(ContextError::ConflictingBindingType {
                        key: self.key().to_string(),
                        existing: existing.to_string(),
                        requested: requested.to_string(),
                    });
                }
            }
            state.source = Some(source);
        }
        self.inner.cache.clear();
        tracing::debug!(key = %self.key(), binding_type = %requested, "binding source set");
        self.notify_changed();
        Ok(self.clone())
    }

    /// Produce the value of this binding, honoring its scope.
    pub(crate) fn resolve(
        &self,
        ctx: &Context,
        session: &mut ResolutionSession,
    ) -> Result<ValueOrPromise<BoundValue>> {
        let (scope, source) = {
            let state = self.read();
            (state.scope, state.source.clone())
        };
        let source = source.ok_or_else(|| ContextError::InvalidBindingTarget {
            key: self.key().to_string(),
            reason: "no value source was set for the binding".to_string(),
        })?;
        tracing::trace!(key = %self.key(), %scope, context = ctx.name(), "resolving binding");

        match scope {
            BindingScope::Transient => source.produce(self, ctx, session),
            BindingScope::Singleton => {
                let owner = self.singleton_owner(ctx)?;
                self.inner
                    .cache
                    .get_or_resolve(|| source.produce(self, &owner, session))
            }
            BindingScope::Context => ctx
                .scoped_cache(self)
                .get_or_resolve(|| source.produce(self, ctx, session)),
        }
    }

    /// Singletons resolve their dependencies from the owning context.
    fn singleton_owner(&self, requester: &Context) -> Result<Context> {
        match self.owner_weak() {
            None => Ok(requester.clone()),
            Some(weak) => match weak.upgrade().map(Context::from_inner) {
                Some(owner) if !owner.is_closed() => Ok(owner),
                Some(owner) => Err(ContextError::closed(owner.name())),
                None => Err(ContextError::closed(format!("owning '{}'", self.key()))),
            },
        }
    }

    /// The cached singleton value, once any pending construction is done.
    pub(crate) async fn settled_value(&self) -> Option<(BoundValue, u64)> {
        self.inner.cache.settled().await
    }

    pub(crate) fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub(crate) fn disposer(&self) -> Option<DisposeHook> {
        self.read().disposer.clone()
    }

    pub(crate) fn attach(&self, owner: &Arc<ContextInner>) {
        *self
            .inner
            .owner
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(owner));
    }

    fn owner_weak(&self) -> Option<Weak<ContextInner>> {
        self.inner
            .owner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn notify_changed(&self) {
        if let Some(owner) = self.owner_context() {
            owner.emit(ContextEventKind::Changed, self);
        }
    }

    /// JSON description used by [`Context::inspect`].
    pub fn inspect(&self) -> serde_json::Value {
        let state = self.read();
        let mut json = serde_json::json!({
            "key": self.key().to_string(),
            "scope": state.scope,
            "tags": state.tags,
            "locked": state.locked,
            "type": state.source.as_ref().map(BindingSource::binding_type),
        });
        if let Some(target) = state.source.as_ref().and_then(BindingSource::target) {
            json["target"] = serde_json::Value::String(target);
        }
        json
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BindingState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BindingState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("Binding")
            .field("key", &self.key().to_string())
            .field("scope", &state.scope)
            .field("tags", &state.tags)
            .field("type", &state.source.as_ref().map(BindingSource::binding_type))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let binding = Binding::create("a").unwrap();
        assert_eq!(binding.scope(), BindingScope::Transient);
        assert_eq!(binding.binding_type(), None);
        assert!(binding.tag_names().is_empty());
        assert!(!binding.is_locked());
    }

    #[test]
    fn test_rejects_key_with_path() {
        assert!(matches!(
            Binding::create("a#b"),
            Err(ContextError::InvalidBindingKey { .. })
        ));
    }

    #[test]
    fn test_conflicting_source_types() {
        let binding = Binding::create("a").unwrap();
        binding.to(1u32).unwrap();
        // same type replaces the value
        binding.to(2u32).unwrap();
        let err = binding.to_dynamic_value(|_| Ok(3u32)).unwrap_err();
        assert!(matches!(
            err,
            ContextError::ConflictingBindingType { existing, requested, .. }
                if existing == "Constant" && requested == "DynamicValue"
        ));
    }

    #[test]
    fn test_tags_are_deduplicated_and_ordered() {
        let binding = Binding::create("a")
            .unwrap()
            .tag("b")
            .tag_many(["a", "b", "c"]);
        assert_eq!(binding.tag_names(), vec!["b", "a", "c"]);
        assert!(binding.has_tag("c"));
    }

    #[test]
    fn test_alias_to_self_is_rejected() {
        let binding = Binding::create("a").unwrap();
        assert!(matches!(
            binding.to_alias("a#x"),
            Err(ContextError::InvalidBindingTarget { .. })
        ));
    }

    #[test]
    fn test_inspect() {
        let binding = Binding::create("a")
            .unwrap()
            .tag("t")
            .in_scope(BindingScope::Singleton)
            .to_alias("b")
            .unwrap();
        let json = binding.inspect();
        assert_eq!(json["key"], "a");
        assert_eq!(json["scope"], "Singleton");
        assert_eq!(json["type"], "Alias");
        assert_eq!(json["target"], "b");
        assert_eq!(json["tags"][0], "t");
    }
}
