//! Cache Service Module
//!
//! Name-based entry point combining the registry with the coalescing executor.
//! Requests against caches that cannot be resolved still run the operation,
//! only without caching.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::warn;

use crate::cache::{Cache, CacheHandle, UpdateListener};
use crate::error::{CacheError, Result};
use crate::executor::{CacheExecutor, InvalidationOptions};
use crate::registry::CacheRegistry;
use crate::source::Source;
use crate::stream::ValueStream;

#[derive(Debug, Clone)]
pub struct CacheService {
    registry: Arc<CacheRegistry>,
    executor: CacheExecutor,
}

impl CacheService {
    pub fn new(registry: Arc<CacheRegistry>) -> Self {
        Self {
            registry,
            executor: CacheExecutor::new(),
        }
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &CacheExecutor {
        &self.executor
    }

    fn resolve<E>(&self, name: &str) -> Option<Arc<Cache<E>>>
    where
        E: Clone + Send + Sync + 'static,
    {
        match self.registry.cache::<E>(name) {
            Ok(cache) => Some(cache),
            Err(err) => {
                warn!(cache = %name, "Cache is not available, skipping cache: {}", err);
                None
            }
        }
    }

    // == Load ==
    /// Loads `key` through the cache named `cache_name`.
    ///
    /// When the cache cannot be resolved, the source is evaluated directly.
    pub fn load<E, F>(&self, cache_name: &str, key: &str, source: F) -> BoxFuture<'static, Result<E>>
    where
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Source<E>,
    {
        match self.resolve::<E>(cache_name) {
            Some(cache) => self.executor.load(&cache, key, source).boxed(),
            None => source().into_future(),
        }
    }

    // == Update ==
    /// Evaluates `source` and writes its value into every resolvable cache.
    pub fn update<E>(
        &self,
        cache_names: &[&str],
        key: &str,
        source: Source<E>,
        listener: Option<UpdateListener<E>>,
    ) -> BoxFuture<'static, Result<E>>
    where
        E: Clone + Send + Sync + 'static,
    {
        let caches: Vec<Arc<Cache<E>>> = cache_names
            .iter()
            .filter_map(|name| self.resolve::<E>(name))
            .collect();
        self.executor.update(&caches, key, source, listener).boxed()
    }

    // == Invalidate ==
    /// Wraps `operation` so that `key` is invalidated in the named caches.
    pub fn invalidate<F, T, Er>(
        &self,
        cache_names: &[&str],
        key: &str,
        operation: F,
        options: InvalidationOptions,
    ) -> BoxFuture<'static, std::result::Result<T, Er>>
    where
        F: Future<Output = std::result::Result<T, Er>> + Send + 'static,
        T: Send + 'static,
        Er: Send + 'static,
    {
        let caches = self.registry.get_or_create_all(cache_names);
        self.executor.invalidate(caches, key, operation, options)
    }

    // == Invalidate All ==
    /// Wraps `operation` so that the named caches are cleared.
    pub fn invalidate_all<F, T, Er>(
        &self,
        cache_names: &[&str],
        operation: F,
        options: InvalidationOptions,
    ) -> BoxFuture<'static, std::result::Result<T, Er>>
    where
        F: Future<Output = std::result::Result<T, Er>> + Send + 'static,
        T: Send + 'static,
        Er: Send + 'static,
    {
        let caches = self.registry.get_or_create_all(cache_names);
        self.executor.invalidate_all(caches, operation, options)
    }

    // == Stream ==
    /// Subscribes to the stream cache named `cache_name`.
    ///
    /// # Errors
    /// Registry resolution errors and those of [`crate::StreamCache::load_stream`].
    pub fn stream<E, F>(&self, cache_name: &str, key: &str, supplier: F) -> Result<ValueStream<E>>
    where
        E: Clone + Send + Sync + 'static,
        F: Fn() -> Source<E> + Send + Sync + 'static,
    {
        self.registry
            .stream_cache::<E>(cache_name)?
            .load_stream(key, supplier)
    }

    /// Clears every constructed cache.
    pub fn invalidate_everything(&self) {
        for cache in self.registry.all_caches() {
            cache.invalidate_all();
        }
    }

    /// Number of stored entries in the named cache, if it is constructed.
    pub fn size(&self, cache_name: &str) -> Result<usize> {
        self.registry
            .lookup(cache_name)
            .map(|cache: Arc<dyn CacheHandle>| cache.size())
            .ok_or_else(|| CacheError::UnknownCache(cache_name.to_string()))
    }
}
