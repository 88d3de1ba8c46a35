//! Cache Module
//!
//! Named cache combining a backing storage with LRU capacity, write/access
//! expiry, conditional caching and listener fan-out.

use std::fmt;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::eviction::{DropListener, EvictionController};
use crate::cache::stats::StatsCounters;
use crate::cache::{
    CacheEntry, CacheHandle, CacheStats, ChangeListener, InvalidateListener, InvalidationInfo,
    UpdateInfo, UpdateListener,
};
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::storage::{InMemoryStorage, Storage};
use crate::tasks::spawn_invalidation_task;

/// Predicate deciding that a value must NOT be cached.
pub type UnlessCondition<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

enum Lookup<E> {
    Hit(E),
    Expired,
    Miss,
}

// == Cache ==
/// Named key/value cache.
///
/// All storage access happens under a single lock, so a lookup followed by
/// the access-time write is atomic. Listeners run after the lock is released
/// and may freely call back into this or any other cache.
pub struct Cache<E> {
    name: String,
    storage: Mutex<Box<dyn Storage<E>>>,
    config: CacheConfig,
    unless: Option<UnlessCondition<E>>,
    update_listeners: RwLock<Vec<UpdateListener<E>>>,
    invalidate_listeners: RwLock<Vec<InvalidateListener>>,
    stats: Arc<StatsCounters>,
    clock: Arc<dyn Clock>,
    subscriptions: Mutex<Vec<JoinHandle<()>>>,
}

impl<E> fmt::Debug for Cache<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<E> Cache<E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Starts building a cache named `name`.
    pub fn builder(name: impl Into<String>) -> CacheBuilder<E> {
        CacheBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective limits of this cache.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // == Get ==
    /// Retrieves a valid value by key.
    ///
    /// Expired entries are removed and reported as a miss. A hit refreshes
    /// the entry's access time, which also marks it most recently used.
    pub fn get(&self, key: &str) -> Option<E> {
        let now = self.clock.now_ms();

        let lookup = {
            let mut storage = self.storage.lock();
            match storage.get(key) {
                Some(entry)
                    if entry.is_expired(
                        now,
                        self.config.expire_after_write,
                        self.config.expire_after_access,
                    ) =>
                {
                    storage.remove(key);
                    Lookup::Expired
                }
                Some(entry) => {
                    let value = entry.value.clone();
                    storage.put(key, entry.touched(now));
                    Lookup::Hit(value)
                }
                None => Lookup::Miss,
            }
        };

        match lookup {
            Lookup::Hit(value) => {
                self.stats.record_hit();
                debug!(cache = %self.name, key, "cache HIT");
                Some(value)
            }
            Lookup::Expired => {
                self.stats.record_expiration();
                self.stats.record_miss();
                debug!(cache = %self.name, key, "cache EXPIRED");
                None
            }
            Lookup::Miss => {
                self.stats.record_miss();
                debug!(cache = %self.name, key, "cache MISS");
                None
            }
        }
    }

    // == Load ==
    /// Returns the cached value, or evaluates `source` and caches its result.
    pub fn load<F>(&self, key: &str, source: F) -> E
    where
        F: FnOnce() -> E,
    {
        match self.get(key) {
            Some(value) => value,
            None => self.put(key, source()),
        }
    }

    // == Put ==
    /// Stores a value and notifies update listeners.
    ///
    /// When the `unless` condition holds for the value, nothing is stored and
    /// no listener fires. The value is returned either way.
    pub fn put(&self, key: &str, value: E) -> E {
        if let Some(unless) = &self.unless {
            if unless(&value) {
                debug!(cache = %self.name, key, "skip PUT due to unless condition");
                return value;
            }
        }

        let now = self.clock.now_ms();
        self.storage
            .lock()
            .put(key, CacheEntry::new(value.clone(), now));
        debug!(cache = %self.name, key, "cache PUT");

        self.notify_updated(key, &value);
        value
    }

    // == Invalidate ==
    /// Removes an entry, notifying invalidate listeners only if it existed.
    pub fn invalidate(&self, key: &str) {
        let removed = self.storage.lock().remove(key);
        if removed.is_some() {
            debug!(cache = %self.name, key, "cache INVALIDATE");
            self.notify_invalidated(&InvalidationInfo::key(key));
        }
    }

    // == Invalidate All ==
    /// Clears the cache and always notifies invalidate listeners.
    pub fn invalidate_all(&self) {
        self.storage.lock().clear();
        debug!(cache = %self.name, "cache INVALIDATE ALL");
        self.notify_invalidated(&InvalidationInfo::all());
    }

    // == Cleanup Expired ==
    /// Removes all expired entries without notifying listeners.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&self) -> usize {
        if self.config.expire_after_write.is_none() && self.config.expire_after_access.is_none() {
            return 0;
        }
        let now = self.clock.now_ms();
        let mut storage = self.storage.lock();
        let expired: Vec<String> = storage
            .entries()
            .into_iter()
            .filter(|(_, entry)| {
                entry.is_expired(
                    now,
                    self.config.expire_after_write,
                    self.config.expire_after_access,
                )
            })
            .map(|(key, _)| key)
            .collect();

        for key in &expired {
            storage.remove(key);
            self.stats.record_expiration();
        }
        expired.len()
    }

    /// Lists every stored `(key, value)` pair.
    ///
    /// Expiry is only checked on read, so expired entries may be included.
    pub fn entries(&self) -> Vec<(String, E)> {
        self.storage
            .lock()
            .entries()
            .into_iter()
            .map(|(key, entry)| (key, entry.value))
            .collect()
    }

    /// Number of stored entries, expired ones included.
    pub fn size(&self) -> usize {
        self.storage.lock().size()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.size())
    }

    pub fn add_update_listener(&self, listener: UpdateListener<E>) {
        self.update_listeners.write().push(listener);
    }

    pub fn add_invalidate_listener(&self, listener: InvalidateListener) {
        self.invalidate_listeners.write().push(listener);
    }

    // == Invalidate On ==
    /// Clears this cache every time `signal` yields an item.
    ///
    /// # Errors
    /// Fails with [`crate::CacheError::NoRuntime`] outside a tokio runtime.
    pub fn invalidate_on<S>(self: &Arc<Self>, signal: S) -> Result<()>
    where
        S: Stream + Send + 'static,
    {
        let handle: Arc<dyn CacheHandle> = Arc::clone(self) as Arc<dyn CacheHandle>;
        let task = spawn_invalidation_task(Arc::downgrade(&handle), signal)?;
        self.subscriptions.lock().push(task);
        Ok(())
    }

    /// Releases all external invalidation subscriptions.
    pub fn dispose(&self) {
        for task in self.subscriptions.lock().drain(..) {
            task.abort();
        }
        debug!(cache = %self.name, "cache DISPOSED");
    }

    fn notify_updated(&self, key: &str, value: &E) {
        let listeners = self.update_listeners.read().clone();
        if listeners.is_empty() {
            return;
        }
        let info = UpdateInfo {
            key: key.to_string(),
            value: value.clone(),
        };
        for listener in listeners {
            listener(&info);
        }
    }

    fn notify_invalidated(&self, info: &InvalidationInfo) {
        let listeners = self.invalidate_listeners.read().clone();
        for listener in listeners {
            listener(info);
        }
    }
}

impl<E> CacheHandle for Cache<E>
where
    E: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn invalidate(&self, key: &str) {
        Cache::invalidate(self, key)
    }

    fn invalidate_all(&self) {
        Cache::invalidate_all(self)
    }

    fn size(&self) -> usize {
        Cache::size(self)
    }

    fn add_invalidate_listener(&self, listener: InvalidateListener) {
        Cache::add_invalidate_listener(self, listener)
    }

    fn add_change_listener(&self, listener: ChangeListener) {
        self.add_update_listener(Arc::new(move |info: &UpdateInfo<E>| listener(&info.key)));
    }

    fn dispose(&self) {
        Cache::dispose(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

// == Cache Builder ==
/// Builder for [`Cache`]. Limits are validated by [`CacheBuilder::build`].
pub struct CacheBuilder<E> {
    name: String,
    config: CacheConfig,
    storage: Option<Box<dyn Storage<E>>>,
    unless: Option<UnlessCondition<E>>,
    update_listeners: Vec<UpdateListener<E>>,
    invalidate_listeners: Vec<InvalidateListener>,
    clock: Option<Arc<dyn Clock>>,
    signals: Vec<BoxStream<'static, ()>>,
}

impl<E> CacheBuilder<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: CacheConfig::default(),
            storage: None,
            unless: None,
            update_listeners: Vec::new(),
            invalidate_listeners: Vec::new(),
            clock: None,
            signals: Vec::new(),
        }
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.config.max_size = Some(max_size);
        self
    }

    /// Write TTL in milliseconds.
    pub fn expire_after_write(mut self, ms: u64) -> Self {
        self.config.expire_after_write = Some(ms);
        self
    }

    /// Access TTL in milliseconds.
    pub fn expire_after_access(mut self, ms: u64) -> Self {
        self.config.expire_after_access = Some(ms);
        self
    }

    /// Takes every limit not set explicitly from `defaults`.
    pub fn with_defaults(mut self, defaults: &CacheConfig) -> Self {
        self.config = self.config.or(defaults);
        self
    }

    /// Backing storage. Defaults to [`InMemoryStorage`].
    pub fn storage(mut self, storage: impl Storage<E> + 'static) -> Self {
        self.storage = Some(Box::new(storage));
        self
    }

    /// Skips caching of any value for which `condition` returns true.
    pub fn unless<F>(mut self, condition: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.unless = Some(Arc::new(condition));
        self
    }

    pub fn update_listener(mut self, listener: UpdateListener<E>) -> Self {
        self.update_listeners.push(listener);
        self
    }

    pub fn invalidate_listener(mut self, listener: InvalidateListener) -> Self {
        self.invalidate_listeners.push(listener);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Clears the cache whenever `signal` yields. May be called repeatedly.
    pub fn invalidate_on<S>(mut self, signal: S) -> Self
    where
        S: Stream + Send + 'static,
    {
        self.signals.push(signal.map(|_| ()).boxed());
        self
    }

    // == Build ==
    /// Validates the configuration and creates the cache.
    ///
    /// # Errors
    /// - [`crate::CacheError::InvalidConfig`] if any limit is lower than 1
    /// - [`crate::CacheError::NoRuntime`] if signals are configured outside a tokio runtime
    pub fn build(self) -> Result<Arc<Cache<E>>> {
        self.config.validate()?;

        let stats = Arc::new(StatsCounters::default());
        let storage = self
            .storage
            .unwrap_or_else(|| Box::new(InMemoryStorage::new()));
        let storage: Box<dyn Storage<E>> = match self.config.max_size {
            Some(max_size) => {
                let counters = Arc::clone(&stats);
                let cache_name = self.name.clone();
                let on_drop: DropListener<E> = Arc::new(move |key: &str, _: &CacheEntry<E>| {
                    counters.record_eviction();
                    debug!(cache = %cache_name, key, "cache EVICT");
                });
                Box::new(EvictionController::new(storage, max_size, Some(on_drop)))
            }
            None => storage,
        };

        let cache = Arc::new(Cache {
            name: self.name,
            storage: Mutex::new(storage),
            config: self.config,
            unless: self.unless,
            update_listeners: RwLock::new(self.update_listeners),
            invalidate_listeners: RwLock::new(self.invalidate_listeners),
            stats,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            subscriptions: Mutex::new(Vec::new()),
        });

        for signal in self.signals {
            cache.invalidate_on(signal)?;
        }
        Ok(cache)
    }
}
