use super::{ContextBuilder, ContextEvent, ContextEventKind, ContextObserver, ContextView, Subscription};
use crate::binding::{Binding, BindingFilter, BindingScope, BoundValue, filter_by_tag};
use crate::error::{ContextError, Result};
use crate::key::{AsBindingKey, BindingKey, IntoBindingKey};
use crate::lifecycle::{self, PendingDisposal};
use crate::resolution::{ResolutionOptions, ResolutionSession, ValueCache, ValueOrPromise};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

/// Hierarchical registry of bindings.
///
/// A `Context` is a cheap handle: clones share the same registry. Lookups
/// that miss fall through to the parent chain. A child context never writes
/// to its ancestors, and holds its parent only weakly, so the parent must be
/// kept alive by its creator for as long as children resolve through it.
///
/// # Example
/// ```
/// use bindery::Context;
///
/// let app = Context::named("app");
/// app.bind("user").unwrap().to(String::from("John")).unwrap();
/// app.bind("greeting")
///     .unwrap()
///     .to_dynamic_value(|rc| Ok(format!("Hello, {}", rc.get_sync::<String>("user")?)))
///     .unwrap();
///
/// let request = app.create_child("request");
/// assert_eq!(*request.get_sync::<String>("greeting").unwrap(), "Hello, John");
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

pub(crate) struct ContextInner {
    name: String,
    parent: Option<Weak<ContextInner>>,
    registry: DashMap<String, RegistryEntry>,
    sequence: AtomicU64,
    scoped: DashMap<u64, ScopedEntry>,
    observers: RwLock<Vec<ObserverEntry>>,
    next_observer_id: AtomicU64,
    closed: AtomicBool,
}

#[derive(Clone)]
struct RegistryEntry {
    seq: u64,
    binding: Binding,
}

#[derive(Clone)]
struct ScopedEntry {
    binding: Binding,
    cache: Arc<ValueCache>,
}

struct ObserverEntry {
    id: u64,
    observer: Arc<dyn ContextObserver>,
}

impl ContextInner {
    pub(crate) fn remove_observer(&self, id: u64) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|o| o.id != id);
        observers.len() != before
    }
}

impl Context {
    /// Create a root context with a generated name.
    pub fn new() -> Self {
        Self::create(None, None)
    }

    /// Create a root context.
    pub fn named(name: impl Into<String>) -> Self {
        Self::create(Some(name.into()), None)
    }

    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    /// Create a child of this context, e.g. for one request.
    pub fn create_child(&self, name: impl Into<String>) -> Self {
        Self::create(Some(name.into()), Some(self))
    }

    pub(crate) fn create(name: Option<String>, parent: Option<&Context>) -> Self {
        let name = name.unwrap_or_else(|| format!("context-{}", uuid::Uuid::new_v4()));
        tracing::debug!(
            context = %name,
            parent = parent.map(Context::name),
            "context created"
        );
        Self {
            inner: Arc::new(ContextInner {
                name,
                parent: parent.map(|p| Arc::downgrade(&p.inner)),
                registry: DashMap::new(),
                sequence: AtomicU64::new(0),
                scoped: DashMap::new(),
                observers: RwLock::new(Vec::new()),
                next_observer_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The parent context, if any and still alive.
    pub fn parent(&self) -> Option<Context> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Context::from_inner)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn same_as(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ContextError::closed(self.name()));
        }
        Ok(())
    }

    /// This context followed by its live ancestors, nearest first.
    pub fn chain(&self) -> Vec<Context> {
        let mut chain = vec![self.clone()];
        let mut current = self.parent();
        while let Some(ctx) = current {
            current = ctx.parent();
            chain.push(ctx);
        }
        chain
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    /// Create (or replace) the binding for `key` in this context.
    ///
    /// Replacing discards the earlier binding; nothing is merged.
    pub fn bind(&self, key: impl AsBindingKey) -> Result<Binding> {
        let binding = Binding::create(key)?;
        self.add(&binding)?;
        Ok(binding)
    }

    /// Register a binding created with [`Binding::create`].
    pub fn add(&self, binding: &Binding) -> Result<()> {
        self.ensure_open()?;
        let key = binding.key().key().to_string();
        let replaced = match self.inner.registry.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get().binding.clone();
                if existing.is_locked() && !existing.same_as(binding) {
                    return Err(ContextError::BindingLocked {
                        key,
                        context: self.name().to_string(),
                    });
                }
                // a rebind keeps the key's insertion position
                let seq = occupied.get().seq;
                occupied.insert(RegistryEntry {
                    seq,
                    binding: binding.clone(),
                });
                Some(existing)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(RegistryEntry {
                    seq: self.inner.sequence.fetch_add(1, Ordering::Relaxed),
                    binding: binding.clone(),
                });
                None
            }
        };
        binding.attach(&self.inner);
        tracing::debug!(context = %self.name(), %key, "binding added");

        if let Some(old) = replaced.filter(|old| !old.same_as(binding)) {
            self.inner.scoped.remove(&old.id());
            self.emit(ContextEventKind::Unbind, &old);
        }
        self.emit(ContextEventKind::Bind, binding);
        Ok(())
    }

    /// Remove a binding owned by this context. Ancestors are never touched.
    pub fn unbind(&self, key: impl AsBindingKey) -> Result<bool> {
        let key = key.as_binding_key()?;
        let locked = self
            .inner
            .registry
            .get(key.key())
            .map(|entry| entry.binding.is_locked());
        if locked == Some(true) {
            return Err(ContextError::BindingLocked {
                key: key.key().to_string(),
                context: self.name().to_string(),
            });
        }
        match self.inner.registry.remove(key.key()) {
            Some((_, entry)) => {
                self.inner.scoped.remove(&entry.binding.id());
                tracing::debug!(context = %self.name(), key = %key, "binding removed");
                self.emit(ContextEventKind::Unbind, &entry.binding);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ---------------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------------

    /// Whether `key` is bound here or in any ancestor.
    pub fn is_bound(&self, key: impl AsBindingKey) -> bool {
        self.get_binding(key).is_some()
    }

    /// Whether `key` is bound in this context itself.
    pub fn contains(&self, key: impl AsBindingKey) -> bool {
        key.as_binding_key()
            .map(|k| self.inner.registry.contains_key(k.key()))
            .unwrap_or(false)
    }

    /// The nearest binding for `key`, walking toward the root.
    pub fn get_binding(&self, key: impl AsBindingKey) -> Option<Binding> {
        let key = key.as_binding_key().ok()?;
        self.lookup(key.key()).map(|(binding, _)| binding)
    }

    /// The context owning the nearest binding for `key`.
    pub fn owner_of(&self, key: impl AsBindingKey) -> Option<Context> {
        let key = key.as_binding_key().ok()?;
        self.lookup(key.key()).map(|(_, owner)| owner)
    }

    fn lookup(&self, key: &str) -> Option<(Binding, Context)> {
        self.chain().into_iter().find_map(|ctx| {
            let binding = ctx.inner.registry.get(key).map(|e| e.binding.clone());
            binding.map(|b| (b, ctx))
        })
    }

    fn own_bindings(&self) -> Vec<Binding> {
        let mut entries: Vec<RegistryEntry> = self
            .inner
            .registry
            .iter()
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.binding).collect()
    }

    /// Bindings matching `filter` (a key glob or any [`BindingFilter`]).
    ///
    /// Nearest context first, insertion order within a context. A key bound
    /// at several levels only yields its nearest binding.
    pub fn find(&self, filter: impl Into<BindingFilter>) -> Vec<Binding> {
        let filter = filter.into();
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for ctx in self.chain() {
            for binding in ctx.own_bindings() {
                let fresh = seen.insert(binding.key().key().to_string());
                if fresh && filter.matches(&binding) {
                    found.push(binding);
                }
            }
        }
        found
    }

    pub fn find_by_tag(&self, tag: impl Into<String>) -> Vec<Binding> {
        self.find(filter_by_tag(tag))
    }

    /// The first binding matching `filter`: nearest context first, then
    /// earliest insertion.
    pub fn find_one(&self, filter: impl Into<BindingFilter>) -> Option<Binding> {
        let filter = filter.into();
        let mut found = self.find(filter.clone()).into_iter();
        let first = found.next()?;
        let others = found.count();
        if others > 0 {
            tracing::warn!(
                filter = filter.description(),
                chosen = %first.key(),
                others,
                "several bindings match a single-value lookup"
            );
        }
        Some(first)
    }

    // ---------------------------------------------------------------------
    // Resolution
    // ---------------------------------------------------------------------

    /// Resolve `key` to its value, awaiting asynchronous dependencies.
    pub async fn get<T: Send + Sync + 'static>(&self, key: impl IntoBindingKey<T>) -> Result<Arc<T>> {
        let key = key.into_binding_key()?;
        let value = self
            .get_value_or_promise(&key, ResolutionOptions::default())?
            .resolve()
            .await?;
        required(&key, self, value)
    }

    /// Resolve `key` synchronously.
    ///
    /// Fails with `AsyncResolutionNotAllowed` if any dependency in the chain
    /// can only be resolved asynchronously; this never blocks.
    pub fn get_sync<T: Send + Sync + 'static>(&self, key: impl IntoBindingKey<T>) -> Result<Arc<T>> {
        let key = key.into_binding_key()?;
        let value = self
            .get_value_or_promise(&key, ResolutionOptions::default())?
            .into_sync(key.key())?;
        required(&key, self, value)
    }

    /// Like [`Context::get`], but an unbound key yields `None`.
    pub async fn get_optional<T: Send + Sync + 'static>(
        &self,
        key: impl IntoBindingKey<T>,
    ) -> Result<Option<Arc<T>>> {
        self.get_with(key, ResolutionOptions::optional()).await
    }

    pub fn get_optional_sync<T: Send + Sync + 'static>(
        &self,
        key: impl IntoBindingKey<T>,
    ) -> Result<Option<Arc<T>>> {
        self.get_sync_with(key, ResolutionOptions::optional())
    }

    pub async fn get_with<T: Send + Sync + 'static>(
        &self,
        key: impl IntoBindingKey<T>,
        options: ResolutionOptions,
    ) -> Result<Option<Arc<T>>> {
        let key = key.into_binding_key()?;
        let value = self.get_value_or_promise(&key, options)?.resolve().await?;
        value.map(|v| downcast(&key, v)).transpose()
    }

    pub fn get_sync_with<T: Send + Sync + 'static>(
        &self,
        key: impl IntoBindingKey<T>,
        options: ResolutionOptions,
    ) -> Result<Option<Arc<T>>> {
        let key = key.into_binding_key()?;
        let value = self
            .get_value_or_promise(&key, options)?
            .into_sync(key.key())?;
        value.map(|v| downcast(&key, v)).transpose()
    }

    /// The primitive behind `get` and `get_sync`: a plain value when every
    /// step completed synchronously, otherwise a future.
    pub fn get_value_or_promise(
        &self,
        key: impl AsBindingKey,
        options: ResolutionOptions,
    ) -> Result<ValueOrPromise<Option<BoundValue>>> {
        let key = key.as_binding_key()?;
        let ResolutionOptions { optional, session } = options;
        let mut session = session.unwrap_or_default();
        self.resolve_in_session(&key, optional, &mut session)
    }

    pub(crate) fn resolve_in_session(
        &self,
        key: &BindingKey<()>,
        optional: bool,
        session: &mut ResolutionSession,
    ) -> Result<ValueOrPromise<Option<BoundValue>>> {
        self.ensure_open()?;
        let Some((binding, _owner)) = self.lookup(key.key()) else {
            if optional {
                tracing::trace!(context = %self.name(), %key, "optional key is not bound");
                return Ok(ValueOrPromise::Value(None));
            }
            return Err(ContextError::not_found(
                key.key(),
                self.name(),
                session.binding_path(),
            ));
        };

        let value = session.enter_binding(key.key(), |session| binding.resolve(self, session))?;
        if value.is_promise() {
            session.mark_async();
        }

        match key.path().filter(|p| !p.is_empty()) {
            None => Ok(value.map(Some)),
            Some(path) => {
                let base = key.key().to_string();
                let path = path.to_string();
                value.and_then(move |v| {
                    crate::config::deep_property(&base, &v, &path, optional).map(ValueOrPromise::Value)
                })
            }
        }
    }

    pub(crate) fn resolve_required(
        &self,
        key: &BindingKey<()>,
        session: &mut ResolutionSession,
    ) -> Result<ValueOrPromise<BoundValue>> {
        let missing = ContextError::not_found(key.to_string(), self.name(), session.binding_path());
        self.resolve_in_session(key, false, session)?
            .and_then(move |v| v.map(ValueOrPromise::Value).ok_or(missing))
    }

    pub(crate) fn scoped_cache(&self, binding: &Binding) -> Arc<ValueCache> {
        if let Some(entry) = self.inner.scoped.get(&binding.id()) {
            return Arc::clone(&entry.cache);
        }
        // entries of bindings since rebound or unbound in an ancestor
        self.inner.scoped.retain(|_, entry| still_registered(&entry.binding));
        let entry = self
            .inner
            .scoped
            .entry(binding.id())
            .or_insert_with(|| ScopedEntry {
                binding: binding.clone(),
                cache: ValueCache::new(),
            });
        Arc::clone(&entry.cache)
    }

    // ---------------------------------------------------------------------
    // Views and observers
    // ---------------------------------------------------------------------

    /// A live view over the bindings matching `filter`, in this context and
    /// its ancestors.
    pub fn create_view(&self, filter: impl Into<BindingFilter>) -> ContextView {
        ContextView::new(self.clone(), filter.into())
    }

    /// Register an observer for bind/unbind/change events of this context.
    pub fn subscribe(&self, observer: Arc<dyn ContextObserver>) -> Subscription {
        let id = self.inner.next_observer_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ObserverEntry { id, observer });
        Subscription::new(Arc::downgrade(&self.inner), id)
    }

    pub fn observer_count(&self) -> usize {
        self.inner
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn emit(&self, kind: ContextEventKind, binding: &Binding) {
        let observers: Vec<Arc<dyn ContextObserver>> = self
            .inner
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|o| Arc::clone(&o.observer))
            .collect();
        if observers.is_empty() {
            return;
        }
        let event = ContextEvent {
            kind,
            binding: binding.clone(),
            context: self.name().to_string(),
        };
        for observer in observers {
            if observer.filter(binding) {
                observer.observe(&event);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Teardown
    // ---------------------------------------------------------------------

    /// Close the context.
    ///
    /// Cached values of disposable bindings owned by this context (its
    /// singletons and its context-scoped values) are disposed in reverse order
    /// of creation, the bindings are released and later resolutions fail.
    /// Ancestors are not touched. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!(context = %self.name(), "Closing context...");

        let mut pending = Vec::new();
        for binding in self.own_bindings() {
            if binding.scope() != BindingScope::Singleton {
                continue;
            }
            let Some(hook) = binding.disposer() else {
                continue;
            };
            // constructions still in flight are awaited so their values get disposed too
            if let Some((value, stamp)) = binding.settled_value().await {
                pending.push(PendingDisposal::new(binding.key().to_string(), hook, value, stamp));
            }
        }
        let scoped: Vec<ScopedEntry> = self.inner.scoped.iter().map(|e| e.value().clone()).collect();
        for entry in scoped {
            let Some(hook) = entry.binding.disposer() else {
                continue;
            };
            if let Some((value, stamp)) = entry.cache.settled().await {
                pending.push(PendingDisposal::new(entry.binding.key().to_string(), hook, value, stamp));
            }
        }

        let failures = lifecycle::dispose_all(self.name(), pending).await;

        for binding in self.own_bindings() {
            binding.clear_cache();
        }
        self.inner.scoped.clear();
        self.inner.registry.clear();
        let observers: Vec<ObserverEntry> = std::mem::take(
            &mut *self
                .inner
                .observers
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for entry in observers {
            entry.observer.context_closed(self.name());
        }

        tracing::info!(context = %self.name(), "Context closed");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ContextError::DisposalFailed {
                context: self.name().to_string(),
                failures,
            })
        }
    }

    /// [`Context::close`] bounded by a timeout.
    pub async fn close_with_timeout(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.close())
            .await
            .map_err(|_| ContextError::DisposalFailed {
                context: self.name().to_string(),
                failures: vec![format!("timeout after {:?}", timeout)],
            })?
    }

    // ---------------------------------------------------------------------
    // Diagnostics
    // ---------------------------------------------------------------------

    /// JSON snapshot of this context and its ancestors.
    pub fn inspect(&self) -> serde_json::Value {
        let bindings: Vec<serde_json::Value> =
            self.own_bindings().iter().map(Binding::inspect).collect();
        let mut json = serde_json::json!({
            "name": self.name(),
            "closed": self.is_closed(),
            "bindings": bindings,
        });
        if let Some(parent) = self.parent() {
            json["parent"] = parent.inspect();
        }
        json
    }
}

fn downcast<T: Send + Sync + 'static>(key: &BindingKey<T>, value: BoundValue) -> Result<Arc<T>> {
    value
        .downcast::<T>()
        .map_err(|_| ContextError::type_mismatch::<T>(key.to_string()))
}

fn required<T: Send + Sync + 'static>(
    key: &BindingKey<T>,
    ctx: &Context,
    value: Option<BoundValue>,
) -> Result<Arc<T>> {
    match value {
        Some(v) => downcast(key, v),
        None => Err(ContextError::not_found(key.to_string(), ctx.name(), Vec::new())),
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name())
            .field("bindings", &self.inner.registry.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn still_registered(binding: &Binding) -> bool {
    binding.owner_context().is_some_and(|owner| {
        owner
            .inner
            .registry
            .get(binding.key().key())
            .is_some_and(|entry| entry.binding.same_as(binding))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_scoped_entries_are_pruned() {
        let app = Context::named("app");
        let request = app.create_child("request");
        let bind_state = |value: u8| {
            app.bind("request.state")
                .unwrap()
                .in_scope(BindingScope::Context)
                .to(value)
                .unwrap();
        };

        bind_state(1);
        assert_eq!(*request.get_sync::<u8>("request.state").unwrap(), 1);
        assert_eq!(request.inner.scoped.len(), 1);

        bind_state(2);
        assert_eq!(*request.get_sync::<u8>("request.state").unwrap(), 2);
        assert_eq!(request.inner.scoped.len(), 1);

        app.unbind("request.state").unwrap();
        bind_state(3);
        request.bind("other").unwrap().in_scope(BindingScope::Context).to(0u8).unwrap();
        request.get_sync::<u8>("other").unwrap();
        assert_eq!(request.inner.scoped.len(), 1);
    }
}
