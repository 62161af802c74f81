use super::{Context, ContextEvent, ContextObserver, Subscription};
use crate::binding::{Binding, BindingFilter, BoundValue};
use crate::error::{ContextError, Result};
use crate::resolution::{ResolutionSession, ValueOrPromise};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// A live handle over the bindings matching a filter, across a context and
/// its ancestors.
///
/// The matching set is cached and invalidated whenever a binding is added,
/// removed or changed anywhere on the chain, so [`ContextView::bindings`]
/// always reflects the current registry. Used for extension points:
///
/// ```
/// use bindery::{filter_by_tag, Context};
///
/// let ctx = Context::new();
/// let view = ctx.create_view(filter_by_tag("greeter"));
/// ctx.bind("greeters.en").unwrap().tag("greeter").to("Hello").unwrap();
/// ctx.bind("greeters.fr").unwrap().tag("greeter").to("Bonjour").unwrap();
///
/// let greetings = view.typed_values_sync::<&'static str>().unwrap();
/// assert_eq!(greetings.len(), 2);
/// ```
#[derive(Clone)]
pub struct ContextView {
    inner: Arc<ViewInner>,
}

struct ViewInner {
    context: Context,
    filter: BindingFilter,
    cached: RwLock<Option<Vec<Binding>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    events: broadcast::Sender<ContextEvent>,
    closed: AtomicBool,
}

struct ViewObserver {
    view: Weak<ViewInner>,
}

impl ContextObserver for ViewObserver {
    fn observe(&self, event: &ContextEvent) {
        let Some(view) = self.view.upgrade() else {
            return;
        };
        let was_member = view
            .cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|bindings| bindings.iter().any(|b| b.same_as(&event.binding)));
        view.invalidate();
        // a Changed event may move a binding out of the view
        if was_member || view.filter.matches(&event.binding) {
            tracing::trace!(
                filter = view.filter.description(),
                kind = %event.kind,
                key = %event.binding.key(),
                "view refreshed"
            );
            let _ = view.events.send(event.clone());
        }
    }

    fn context_closed(&self, context: &str) {
        if let Some(view) = self.view.upgrade() {
            tracing::debug!(context, filter = view.filter.description(), "view closed with its context");
            view.shutdown();
        }
    }
}

impl ViewInner {
    fn invalidate(&self) {
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let subscriptions =
            std::mem::take(&mut *self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner));
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        self.invalidate();
    }
}

impl Drop for ViewInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ContextView {
    pub(crate) fn new(context: Context, filter: BindingFilter) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(ViewInner {
            context,
            filter,
            cached: RwLock::new(None),
            subscriptions: Mutex::new(Vec::new()),
            events,
            closed: AtomicBool::new(false),
        });
        let subscriptions: Vec<Subscription> = inner
            .context
            .chain()
            .iter()
            .map(|ctx| {
                ctx.subscribe(Arc::new(ViewObserver {
                    view: Arc::downgrade(&inner),
                }))
            })
            .collect();
        *inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = subscriptions;
        Self { inner }
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    pub fn filter(&self) -> &BindingFilter {
        &self.inner.filter
    }

    /// The matching bindings: nearest context first, insertion order within
    /// a context.
    pub fn bindings(&self) -> Vec<Binding> {
        if let Some(cached) = self
            .inner
            .cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return cached.clone();
        }
        let found = self.inner.context.find(self.inner.filter.clone());
        if !self.is_closed() {
            *self.inner.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(found.clone());
        }
        found
    }

    /// Drop the cached membership; the next read queries the registry.
    pub fn refresh(&self) {
        self.inner.invalidate();
    }

    pub(crate) fn resolve_values(
        &self,
        session: &mut ResolutionSession,
    ) -> Result<ValueOrPromise<Vec<BoundValue>>> {
        let mut items = Vec::new();
        for binding in self.bindings() {
            let key = binding.key().clone();
            items.push(self.inner.context.resolve_required(&key, session)?);
        }
        Ok(ValueOrPromise::all(items))
    }

    /// Resolve every matching binding, in view order.
    pub async fn values(&self) -> Result<Vec<BoundValue>> {
        let mut session = ResolutionSession::new();
        self.resolve_values(&mut session)?.resolve().await
    }

    pub fn values_sync(&self) -> Result<Vec<BoundValue>> {
        let mut session = ResolutionSession::new();
        let description = self.inner.filter.description().to_string();
        self.resolve_values(&mut session)?.into_sync(&description)
    }

    pub async fn typed_values<T: Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>> {
        let values = self.values().await?;
        self.downcast_all(values)
    }

    pub fn typed_values_sync<T: Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>> {
        let values = self.values_sync()?;
        self.downcast_all(values)
    }

    fn downcast_all<T: Send + Sync + 'static>(&self, values: Vec<BoundValue>) -> Result<Vec<Arc<T>>> {
        values
            .into_iter()
            .map(|value| {
                value
                    .downcast::<T>()
                    .map_err(|_| ContextError::type_mismatch::<T>(self.inner.filter.description()))
            })
            .collect()
    }

    /// Resolve the single matching binding.
    ///
    /// With several matches the nearest, earliest-registered binding wins and
    /// a warning is logged. `None` when nothing matches.
    pub async fn single_value<T: Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>> {
        match self.single_binding() {
            Some(binding) => self.inner.context.get::<T>(binding.key().retype()).await.map(Some),
            None => Ok(None),
        }
    }

    pub fn single_value_sync<T: Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>> {
        match self.single_binding() {
            Some(binding) => self.inner.context.get_sync::<T>(binding.key().retype()).map(Some),
            None => Ok(None),
        }
    }

    fn single_binding(&self) -> Option<Binding> {
        let bindings = self.bindings();
        if bindings.len() > 1 {
            tracing::warn!(
                filter = self.inner.filter.description(),
                chosen = %bindings[0].key(),
                others = bindings.len() - 1,
                "several bindings match a single-value view"
            );
        }
        bindings.into_iter().next()
    }

    /// A receiver for bind/unbind/change events touching this view.
    pub fn events(&self) -> broadcast::Receiver<ContextEvent> {
        self.inner.events.subscribe()
    }

    /// A cloneable resolver for the current values of the view.
    pub fn as_getter(&self) -> ViewGetter {
        ViewGetter { view: self.clone() }
    }

    /// Stop observing the context chain. The view still answers queries,
    /// but no longer caches membership.
    pub fn close(&self) {
        self.inner.shutdown();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ContextView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextView")
            .field("context", &self.inner.context.name())
            .field("filter", &self.inner.filter)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Lazily resolves the values of a [`ContextView`] on each call.
#[derive(Clone, Debug)]
pub struct ViewGetter {
    view: ContextView,
}

impl ViewGetter {
    pub async fn get<T: Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>> {
        self.view.typed_values::<T>().await
    }

    pub fn get_sync<T: Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>> {
        self.view.typed_values_sync::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::filter_by_tag;
    use crate::context::ContextEventKind;

    #[test]
    fn test_view_tracks_bind_and_unbind() {
        let ctx = Context::new();
        let view = ctx.create_view(filter_by_tag("plugin"));
        assert!(view.bindings().is_empty());

        ctx.bind("plugins.a").unwrap().tag("plugin").to(1u8).unwrap();
        ctx.bind("other").unwrap().to(0u8).unwrap();
        assert_eq!(view.bindings().len(), 1);

        ctx.bind("plugins.b").unwrap().tag("plugin").to(2u8).unwrap();
        ctx.unbind("plugins.a").unwrap();
        let keys: Vec<String> = view.bindings().iter().map(|b| b.key().to_string()).collect();
        assert_eq!(keys, vec!["plugins.b"]);
    }

    #[test]
    fn test_view_sees_tags_added_after_registration() {
        let ctx = Context::new();
        let view = ctx.create_view(filter_by_tag("plugin"));
        let binding = ctx.bind("late").unwrap().to(1u8).unwrap();
        assert!(view.bindings().is_empty());
        binding.tag("plugin");
        assert_eq!(view.bindings().len(), 1);
    }

    #[test]
    fn test_child_view_sees_parent_bindings() {
        let parent = Context::named("parent");
        let child = parent.create_child("child");
        let view = child.create_view(filter_by_tag("plugin"));
        parent.bind("plugins.p").unwrap().tag("plugin").to(1u8).unwrap();
        child.bind("plugins.c").unwrap().tag("plugin").to(2u8).unwrap();

        let values = view.typed_values_sync::<u8>().unwrap();
        assert_eq!(values.iter().map(|v| **v).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_view_events() {
        let ctx = Context::new();
        let view = ctx.create_view(filter_by_tag("plugin"));
        let mut events = view.events();
        ctx.bind("ignored").unwrap().to(0u8).unwrap();
        ctx.bind("plugins.a").unwrap().tag("plugin").to(1u8).unwrap();

        // untagged at bind time, then tagged: Bind is skipped, Changed is sent
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, ContextEventKind::Changed);
        assert_eq!(event.binding.key().key(), "plugins.a");
    }

    #[test]
    fn test_close_unsubscribes() {
        let ctx = Context::new();
        let view = ctx.create_view(filter_by_tag("plugin"));
        assert_eq!(ctx.observer_count(), 1);
        view.close();
        assert!(view.is_closed());
        assert_eq!(ctx.observer_count(), 0);
    }

    #[test]
    fn test_dropped_view_unsubscribes() {
        let ctx = Context::new();
        {
            let _view = ctx.create_view(filter_by_tag("plugin"));
            assert_eq!(ctx.observer_count(), 1);
        }
        assert_eq!(ctx.observer_count(), 0);
    }
}
