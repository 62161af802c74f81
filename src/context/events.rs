use super::ContextInner;
use crate::binding::Binding;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ContextEventKind {
    /// A binding was added (or replaced an earlier one).
    Bind,
    /// A binding was removed or replaced.
    Unbind,
    /// A registered binding changed its tags, scope, lock or source.
    Changed,
}

/// Notification delivered synchronously to observers of a context.
#[derive(Debug, Clone)]
pub struct ContextEvent {
    pub kind: ContextEventKind,
    pub binding: Binding,
    /// Name of the context that owns the binding.
    pub context: String,
}

/// Listener for binding changes in a context.
///
/// Observers run synchronously inside `bind`/`unbind`, after the registry
/// has been updated, so they always see a consistent binding set. They must
/// not bind or unbind in the same context.
pub trait ContextObserver: Send + Sync + 'static {
    /// Narrow the events delivered to `observe`.
    fn filter(&self, _binding: &Binding) -> bool {
        true
    }

    fn observe(&self, event: &ContextEvent);

    /// The context this observer is registered with was closed.
    fn context_closed(&self, _context: &str) {}
}

impl<F> ContextObserver for F
where
    F: Fn(&ContextEvent) + Send + Sync + 'static,
{
    fn observe(&self, event: &ContextEvent) {
        self(event)
    }
}

/// Handle to an observer registration.
///
/// Dropping the handle keeps the observer registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    context: Weak<ContextInner>,
    id: u64,
    closed: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(context: Weak<ContextInner>, id: u64) -> Self {
        Self {
            context,
            id,
            closed: AtomicBool::new(false),
        }
    }

    /// Remove the observer. Returns `false` if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        match self.context.upgrade() {
            Some(ctx) => ctx.remove_observer(self.id),
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.context.strong_count() == 0
    }
}
