use super::ValueOrPromise;
use crate::binding::BoundValue;
use crate::error::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

type SharedPromise = Shared<BoxFuture<'static, Result<BoundValue>>>;

/// Orders cached values by the moment they became ready, across contexts.
static READY_STAMP: AtomicU64 = AtomicU64::new(1);

enum CacheState {
    Empty,
    Pending { promise: SharedPromise, generation: u64 },
    Ready { value: BoundValue, stamp: u64 },
}

/// Cache for a singleton or context-scoped value.
///
/// Synchronous construction runs under the lock, so it happens at most once.
/// Asynchronous construction is stored as a shared future: every concurrent
/// caller awaits the same construction.
pub(crate) struct ValueCache {
    state: Mutex<CacheState>,
    generation: AtomicU64,
}

impl ValueCache {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CacheState::Empty),
            generation: AtomicU64::new(0),
        })
    }

    pub(crate) fn get_or_resolve(
        self: &Arc<Self>,
        resolve: impl FnOnce() -> Result<ValueOrPromise<BoundValue>>,
    ) -> Result<ValueOrPromise<BoundValue>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            CacheState::Ready { value, .. } => return Ok(ValueOrPromise::Value(Arc::clone(value))),
            CacheState::Pending { promise, .. } => {
                if let Some(done) = promise.peek() {
                    return done.clone().map(ValueOrPromise::Value);
                }
                return Ok(ValueOrPromise::Promise(promise.clone().boxed()));
            }
            CacheState::Empty => {}
        }

        match resolve()? {
            ValueOrPromise::Value(value) => {
                *state = CacheState::Ready {
                    value: Arc::clone(&value),
                    stamp: READY_STAMP.fetch_add(1, Ordering::Relaxed),
                };
                Ok(ValueOrPromise::Value(value))
            }
            ValueOrPromise::Promise(fut) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                let cache: Weak<Self> = Arc::downgrade(self);
                let shared = async move {
                    let result = fut.await;
                    if let Some(cache) = cache.upgrade() {
                        cache.settle(generation, &result);
                    }
                    result
                }
                .boxed()
                .shared();
                *state = CacheState::Pending {
                    promise: shared.clone(),
                    generation,
                };
                drop(state);

                // Once started, construction runs to completion even if every
                // requester drops its future.
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(shared.clone().map(|_| ()));
                }
                Ok(ValueOrPromise::Promise(shared.boxed()))
            }
        }
    }

    /// Store the outcome of a construction, unless the cache was cleared or
    /// restarted since it began.
    fn settle(&self, generation: u64, result: &Result<BoundValue>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            CacheState::Pending { generation: current, .. } if *current == generation => {}
            _ => return,
        }
        *state = match result {
            Ok(value) => CacheState::Ready {
                value: Arc::clone(value),
                stamp: READY_STAMP.fetch_add(1, Ordering::Relaxed),
            },
            // failed constructions are not cached
            Err(_) => CacheState::Empty,
        };
    }

    /// The cached value and its ready stamp, without resolving anything.
    pub(crate) fn peek(&self) -> Option<(BoundValue, u64)> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            CacheState::Ready { value, stamp } => Some((Arc::clone(value), *stamp)),
            _ => None,
        }
    }

    /// Like [`ValueCache::peek`], but waits for a pending construction first.
    pub(crate) async fn settled(&self) -> Option<(BoundValue, u64)> {
        let pending = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match &*state {
                CacheState::Pending { promise, .. } => Some(promise.clone()),
                _ => None,
            }
        };
        if let Some(promise) = pending {
            // a failed construction leaves nothing to report
            let _ = promise.await;
        }
        self.peek()
    }

    pub(crate) fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = CacheState::Empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counted(counter: &Arc<AtomicUsize>) -> Result<ValueOrPromise<BoundValue>> {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Ok(ValueOrPromise::Value(Arc::new(n) as BoundValue))
    }

    #[test]
    fn test_sync_value_is_constructed_once() {
        let cache = ValueCache::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let v = cache.get_or_resolve(|| counted(&counter)).unwrap();
            let v = v.into_sync("k").unwrap();
            assert_eq!(*v.downcast::<usize>().unwrap(), 0);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_async_construction_is_shared() {
        let cache = ValueCache::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let make = || {
            let counter = Arc::clone(&counter);
            Ok(ValueOrPromise::from_future(async move {
                tokio::task::yield_now().await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new("built") as BoundValue)
            }))
        };
        let a = cache.get_or_resolve(make).unwrap();
        let b = cache.get_or_resolve(make).unwrap();
        let (a, b) = futures::join!(a.resolve(), b.resolve());
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(cache.peek().is_some());
    }

    #[tokio::test]
    async fn test_failed_construction_is_not_cached() {
        let cache = ValueCache::new();
        let failing = cache
            .get_or_resolve(|| {
                Ok(ValueOrPromise::promise(async {
                    Err(anyhow::anyhow!("connection refused"))
                }))
            })
            .unwrap();
        assert!(failing.resolve().await.is_err());
        assert!(cache.peek().is_none());

        let ok = cache
            .get_or_resolve(|| Ok(ValueOrPromise::Value(Arc::new(7u8) as BoundValue)))
            .unwrap();
        assert_eq!(*ok.into_sync("k").unwrap().downcast::<u8>().unwrap(), 7);
    }

    fn delayed(label: &'static str, millis: u64) -> Result<ValueOrPromise<BoundValue>> {
        Ok(ValueOrPromise::from_future(async move {
            tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
            Ok(Arc::new(label) as BoundValue)
        }))
    }

    #[tokio::test]
    async fn test_cleared_construction_does_not_overwrite_newer_one() {
        let cache = ValueCache::new();
        let old = cache.get_or_resolve(|| delayed("old", 50)).unwrap();
        cache.clear();
        let new = cache.get_or_resolve(|| delayed("new", 200)).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let old = old.resolve().await.unwrap();
        assert_eq!(*old.downcast::<&str>().unwrap(), "old");

        // the stale construction finished first but left the cache alone
        let again = cache.get_or_resolve(|| delayed("third", 1)).unwrap();
        let again = again.resolve().await.unwrap();
        assert_eq!(*again.downcast::<&str>().unwrap(), "new");
        let new = new.resolve().await.unwrap();
        assert_eq!(*new.downcast::<&str>().unwrap(), "new");
    }

    #[tokio::test]
    async fn test_settled_waits_for_pending_construction() {
        let cache = ValueCache::new();
        let _pending = cache.get_or_resolve(|| delayed("slow", 20)).unwrap();
        assert!(cache.peek().is_none());

        let (value, _) = cache.settled().await.unwrap();
        assert_eq!(*value.downcast::<&str>().unwrap(), "slow");
    }
}
