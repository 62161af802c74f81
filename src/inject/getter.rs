use crate::context::Context;
use crate::error::Result;
use crate::key::BindingKey;
use std::fmt;
use std::sync::Arc;

/// Lazily resolves a key each time it is called.
///
/// Injected for values that may change during the lifetime of the object
/// holding the getter, e.g. the current user of a long-lived controller.
pub struct Getter<T> {
    context: Context,
    key: BindingKey<T>,
}

impl<T: Send + Sync + 'static> Getter<T> {
    pub fn new(context: Context, key: BindingKey<T>) -> Self {
        Self { context, key }
    }

    pub async fn get(&self) -> Result<Arc<T>> {
        self.context.get(&self.key).await
    }

    pub fn get_sync(&self) -> Result<Arc<T>> {
        self.context.get_sync(&self.key)
    }

    pub fn key(&self) -> &BindingKey<T> {
        &self.key
    }
}

impl<T> Clone for Getter<T> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            key: self.key.clone(),
        }
    }
}

impl<T> fmt::Debug for Getter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Getter")
            .field("context", &self.context.name())
            .field("key", &self.key)
            .finish()
    }
}
