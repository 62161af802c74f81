use crate::binding::BoundValue;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;

/// Cleanup for cached values, run when the owning context closes.
///
/// Mark a binding with [`Binding::disposable`](crate::Binding::disposable)
/// to have its cached (singleton or context-scoped) value disposed.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use bindery::Dispose;
///
/// struct Pool;
///
/// #[async_trait]
/// impl Dispose for Pool {
///     async fn dispose(&self) -> anyhow::Result<()> {
///         tracing::info!("closing pool");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Dispose: Send + Sync {
    async fn dispose(&self) -> anyhow::Result<()>;
}

/// Type-erased disposal of one cached value.
pub type DisposeHook = Arc<dyn Fn(BoundValue) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Build the hook disposing values of type `T`.
///
/// A value of another type is skipped with a warning.
pub(crate) fn dispose_hook<T: Dispose + 'static>() -> DisposeHook {
    Arc::new(|value: BoundValue| match value.downcast::<T>() {
        Ok(typed) => async move { typed.dispose().await }.boxed(),
        Err(_) => {
            tracing::warn!(
                expected = std::any::type_name::<T>(),
                "cached value is not of the disposable type, skipping"
            );
            futures::future::ready(Ok(())).boxed()
        }
    })
}
