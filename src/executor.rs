//! Coalescing Executor Module
//!
//! Runs source evaluations so that concurrent identical requests share a
//! single in-flight operation, and wraps operations with cache invalidation.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, Shared, WeakShared};
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheHandle, InvalidateListener, InvalidationInfo, UpdateInfo, UpdateListener};
use crate::error::Result;
use crate::source::Source;

/// Handle to a shared in-flight operation. Every clone resolves to the same outcome.
pub type SharedLoad<E> = Shared<BoxFuture<'static, Result<E>>>;

type WeakLoad<E> = WeakShared<BoxFuture<'static, Result<E>>>;

type OperationMap = HashMap<String, HashMap<String, InFlight>>;

struct InFlight {
    generation: u64,
    // Only callers keep an operation alive; the map never does
    operation: Box<dyn PendingOperation>,
}

trait PendingOperation: Send + Sync {
    fn is_alive(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<E> PendingOperation for WeakLoad<E>
where
    E: Clone + Send + Sync + 'static,
{
    fn is_alive(&self) -> bool {
        self.upgrade().is_some()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
struct Registrations {
    operations: Mutex<OperationMap>,
    next_generation: AtomicU64,
}

impl Registrations {
    fn release(&self, names: &[String], key: &str, generation: u64) {
        let mut operations = self.operations.lock();
        for name in names {
            let Some(keys) = operations.get_mut(name) else {
                continue;
            };
            if keys.get(key).is_some_and(|op| op.generation == generation) {
                keys.remove(key);
            }
            if keys.is_empty() {
                operations.remove(name);
            }
        }
    }
}

fn find_operation<E>(operations: &OperationMap, name: &str, key: &str) -> Option<SharedLoad<E>>
where
    E: Clone + Send + Sync + 'static,
{
    operations
        .get(name)?
        .get(key)?
        .operation
        .as_any()
        .downcast_ref::<WeakLoad<E>>()?
        .upgrade()
}

// == Invalidation Options ==
/// Controls when a wrapped operation invalidates its caches.
#[derive(Clone, Default)]
pub struct InvalidationOptions {
    /// Invalidate as soon as the operation is first polled instead of after it succeeds
    pub instant: bool,
    /// Notified once the invalidation has been applied
    pub listener: Option<InvalidateListener>,
}

impl fmt::Debug for InvalidationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationOptions")
            .field("instant", &self.instant)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

// == Cache Executor ==
/// Coalesces source evaluations per cache name and key.
///
/// Cloning is cheap; clones share the same in-flight map.
#[derive(Clone, Default)]
pub struct CacheExecutor {
    registrations: Arc<Registrations>,
}

impl fmt::Debug for CacheExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let caches = self.registrations.operations.lock().len();
        f.debug_struct("CacheExecutor")
            .field("caches_in_flight", &caches)
            .finish()
    }
}

impl CacheExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    // == Load ==
    /// Returns the value for `key`, evaluating `source` only when needed.
    ///
    /// # Arguments
    /// * `cache` - Cache to read from and write to
    /// * `key` - Cache key
    /// * `source` - Produces the source on a miss; not called on a hit or join
    ///
    /// # Returns
    /// The in-flight operation for this key if one exists, a ready value on a
    /// valid hit, or a newly started operation.
    pub fn load<E, F>(&self, cache: &Arc<Cache<E>>, key: &str, source: F) -> SharedLoad<E>
    where
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Source<E>,
    {
        if let Some(operation) = self.find(cache.name(), key) {
            debug!(cache = %cache.name(), key, "joining in-flight load");
            return operation;
        }
        if let Some(value) = cache.get(key) {
            return futures::future::ready(Ok(value)).boxed().shared();
        }
        self.start(std::slice::from_ref(cache), key, source(), None, true)
    }

    // == Update ==
    /// Evaluates `source` and writes its value to every cache in `caches`.
    ///
    /// The operation is registered under every cache name before this method
    /// returns, replacing any earlier registration for the same key. It runs
    /// once no matter how many clones of the result are awaited; a failure
    /// reaches every joiner and writes nothing.
    ///
    /// The registration only lives as long as some clone of the returned
    /// future. Dropping every clone cancels the operation, and the next
    /// `load` for the key starts a fresh one.
    pub fn update<E>(
        &self,
        caches: &[Arc<Cache<E>>],
        key: &str,
        source: Source<E>,
        listener: Option<UpdateListener<E>>,
    ) -> SharedLoad<E>
    where
        E: Clone + Send + Sync + 'static,
    {
        self.start(caches, key, source, listener, false)
    }

    fn find<E>(&self, name: &str, key: &str) -> Option<SharedLoad<E>>
    where
        E: Clone + Send + Sync + 'static,
    {
        find_operation(&self.registrations.operations.lock(), name, key)
    }

    fn start<E>(
        &self,
        caches: &[Arc<Cache<E>>],
        key: &str,
        source: Source<E>,
        listener: Option<UpdateListener<E>>,
        join_existing: bool,
    ) -> SharedLoad<E>
    where
        E: Clone + Send + Sync + 'static,
    {
        let generation = self.registrations.next_generation.fetch_add(1, Ordering::Relaxed);
        let names: Vec<String> = caches.iter().map(|cache| cache.name().to_string()).collect();

        let targets = caches.to_vec();
        let released = names.clone();
        let registrations = Arc::downgrade(&self.registrations);
        let owned_key = key.to_string();
        let evaluation = source.into_future();

        let operation = async move {
            let result = evaluation.await;
            match &result {
                Ok(value) => {
                    for cache in &targets {
                        cache.put(&owned_key, value.clone());
                    }
                    if let Some(listener) = &listener {
                        listener(&UpdateInfo {
                            key: owned_key.clone(),
                            value: value.clone(),
                        });
                    }
                }
                Err(err) => warn!(key = %owned_key, "Source evaluation failed: {}", err),
            }
            if let Some(registrations) = registrations.upgrade() {
                registrations.release(&released, &owned_key, generation);
            }
            result
        }
        .boxed()
        .shared();

        let mut operations = self.registrations.operations.lock();
        if join_existing {
            // Another caller may have registered between the lookup and now
            if let Some(existing) = names
                .first()
                .and_then(|name| find_operation::<E>(&operations, name, key))
            {
                return existing;
            }
        }
        let Some(weak) = operation.downgrade() else {
            return operation;
        };
        for name in &names {
            operations.entry(name.clone()).or_default().insert(
                key.to_string(),
                InFlight {
                    generation,
                    operation: Box::new(weak.clone()),
                },
            );
        }
        debug!(key, generation, caches = ?names, "registered in-flight operation");
        operation
    }

    // == Invalidate ==
    /// Wraps `operation` so that `key` is invalidated in every cache.
    ///
    /// Without `instant` the invalidation only happens after the operation
    /// succeeds. The operation's output is returned unchanged either way.
    pub fn invalidate<F, T, Er>(
        &self,
        caches: Vec<Arc<dyn CacheHandle>>,
        key: &str,
        operation: F,
        options: InvalidationOptions,
    ) -> BoxFuture<'static, std::result::Result<T, Er>>
    where
        F: Future<Output = std::result::Result<T, Er>> + Send + 'static,
        T: Send + 'static,
        Er: Send + 'static,
    {
        let key = key.to_string();
        let listener = options.listener;
        with_invalidation(operation, options.instant, move || {
            for cache in &caches {
                cache.invalidate(&key);
            }
            if let Some(listener) = &listener {
                listener(&InvalidationInfo::key(key.as_str()));
            }
        })
    }

    // == Invalidate All ==
    /// Like [`CacheExecutor::invalidate`] but clears every cache completely.
    pub fn invalidate_all<F, T, Er>(
        &self,
        caches: Vec<Arc<dyn CacheHandle>>,
        operation: F,
        options: InvalidationOptions,
    ) -> BoxFuture<'static, std::result::Result<T, Er>>
    where
        F: Future<Output = std::result::Result<T, Er>> + Send + 'static,
        T: Send + 'static,
        Er: Send + 'static,
    {
        let listener = options.listener;
        with_invalidation(operation, options.instant, move || {
            for cache in &caches {
                cache.invalidate_all();
            }
            if let Some(listener) = &listener {
                listener(&InvalidationInfo::all());
            }
        })
    }

    /// Number of keys with a live in-flight operation for `cache_name`.
    pub fn in_flight(&self, cache_name: &str) -> usize {
        self.registrations
            .operations
            .lock()
            .get(cache_name)
            .map_or(0, |keys| keys.values().filter(|op| op.operation.is_alive()).count())
    }
}

fn with_invalidation<F, T, Er, I>(
    operation: F,
    instant: bool,
    invalidate: I,
) -> BoxFuture<'static, std::result::Result<T, Er>>
where
    F: Future<Output = std::result::Result<T, Er>> + Send + 'static,
    T: Send + 'static,
    Er: Send + 'static,
    I: FnOnce() + Send + 'static,
{
    async move {
        if instant {
            invalidate();
            return operation.await;
        }
        let output = operation.await;
        if output.is_ok() {
            invalidate();
        }
        output
    }
    .boxed()
}
