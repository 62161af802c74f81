use crate::error::{ContextError, Result};
use futures::future::{self, BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;

/// Either a value that is available right now, or a future producing it.
///
/// Resolution returns this so that callers decide whether to await
/// (`get`) or to insist on synchronous completion (`get_sync`).
pub enum ValueOrPromise<T> {
    Value(T),
    Promise(BoxFuture<'static, Result<T>>),
}

impl<T: Send + 'static> ValueOrPromise<T> {
    /// Wrap a future whose error is a user error.
    pub fn promise<F>(fut: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::Promise(async move { fut.await.map_err(ContextError::from) }.boxed())
    }

    /// Wrap a future that already yields container errors.
    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self::Promise(fut.boxed())
    }

    pub fn is_promise(&self) -> bool {
        matches!(self, Self::Promise(_))
    }

    pub fn map<U, F>(self, f: F) -> ValueOrPromise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        match self {
            Self::Value(v) => ValueOrPromise::Value(f(v)),
            Self::Promise(p) => ValueOrPromise::Promise(async move { p.await.map(f) }.boxed()),
        }
    }

    /// Chain a step that may itself be sync or async.
    ///
    /// When `self` is a value the step runs immediately, so a chain of
    /// synchronous steps never allocates a future.
    pub fn and_then<U, F>(self, f: F) -> Result<ValueOrPromise<U>>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<ValueOrPromise<U>> + Send + 'static,
    {
        match self {
            Self::Value(v) => f(v),
            Self::Promise(p) => Ok(ValueOrPromise::Promise(
                async move {
                    match f(p.await?)? {
                        ValueOrPromise::Value(u) => Ok(u),
                        ValueOrPromise::Promise(next) => next.await,
                    }
                }
                .boxed(),
            )),
        }
    }

    /// Return the value, failing if it is still pending.
    pub fn into_sync(self, key: &str) -> Result<T> {
        match self {
            Self::Value(v) => Ok(v),
            Self::Promise(_) => Err(ContextError::AsyncResolutionNotAllowed {
                key: key.to_string(),
            }),
        }
    }

    pub fn into_boxed_future(self) -> BoxFuture<'static, Result<T>> {
        match self {
            Self::Value(v) => future::ready(Ok(v)).boxed(),
            Self::Promise(p) => p,
        }
    }

    pub async fn resolve(self) -> Result<T> {
        match self {
            Self::Value(v) => Ok(v),
            Self::Promise(p) => p.await,
        }
    }

    /// Collect many results, preserving order.
    ///
    /// The result is a value when every item is a value.
    pub fn all(items: Vec<ValueOrPromise<T>>) -> ValueOrPromise<Vec<T>> {
        let mut values = Vec::with_capacity(items.len());
        let mut iter = items.into_iter();
        while let Some(item) = iter.next() {
            match item {
                Self::Value(v) => values.push(v),
                Self::Promise(p) => {
                    let mut pending: Vec<BoxFuture<'static, Result<T>>> = values
                        .into_iter()
                        .map(|v| future::ready(Ok(v)).boxed())
                        .collect();
                    pending.push(p);
                    pending.extend(iter.map(ValueOrPromise::into_boxed_future));
                    return ValueOrPromise::Promise(future::try_join_all(pending).boxed());
                }
            }
        }
        ValueOrPromise::Value(values)
    }
}

impl<T: fmt::Debug> fmt::Debug for ValueOrPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Promise(_) => f.write_str("Promise(..)"),
        }
    }
}
