//! Cache Registry Module
//!
//! Owns cache factories and constructed instances, parks listeners for caches
//! that do not exist yet and wires cascade invalidation between caches.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{
    Cache, CacheBuilder, CacheHandle, DeferredListener, InvalidationInfo,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::stream::{StreamCache, StreamCacheBuilder};

/// Builds a cache from the global configuration.
pub type CacheFactory = Arc<dyn Fn(&CacheConfig) -> Result<Arc<dyn CacheHandle>> + Send + Sync>;

// == Cache Registry ==
/// Registry of named caches.
///
/// Caches are constructed lazily on first [`CacheRegistry::get_or_create`];
/// [`CacheRegistry::lookup`] never constructs.
pub struct CacheRegistry {
    factories: RwLock<HashMap<String, CacheFactory>>,
    caches: RwLock<HashMap<String, Arc<dyn CacheHandle>>>,
    deferred: Mutex<HashMap<String, Vec<DeferredListener>>>,
    global: RwLock<CacheConfig>,
}

impl fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut constructed: Vec<String> = self.caches.read().keys().cloned().collect();
        constructed.sort();
        f.debug_struct("CacheRegistry")
            .field("constructed", &constructed)
            .field("global", &*self.global.read())
            .finish_non_exhaustive()
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::with_config(CacheConfig::default())
    }
}

impl CacheRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a registry whose caches inherit `global` for unset limits.
    pub fn with_config(global: CacheConfig) -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            caches: RwLock::new(HashMap::new()),
            deferred: Mutex::new(HashMap::new()),
            global: RwLock::new(global),
        }
    }

    // == Global Config ==
    pub fn global_config(&self) -> CacheConfig {
        self.global.read().clone()
    }

    /// Replaces the defaults used by caches constructed from now on.
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidConfig`] if any limit is lower than 1.
    pub fn set_global_config(&self, config: CacheConfig) -> Result<()> {
        config.validate()?;
        *self.global.write() = config;
        Ok(())
    }

    // == Factories ==
    /// Registers the factory for `name`, replacing any previous one.
    pub fn register_factory(&self, name: impl Into<String>, factory: CacheFactory) {
        let name = name.into();
        debug!(cache = %name, "registered cache factory");
        self.factories.write().insert(name, factory);
    }

    /// Registers a [`Cache`] built by `configure` on top of the global defaults.
    pub fn register_cache<E, F>(&self, name: impl Into<String>, configure: F)
    where
        E: Clone + Send + Sync + 'static,
        F: Fn(CacheBuilder<E>) -> CacheBuilder<E> + Send + Sync + 'static,
    {
        let name = name.into();
        let cache_name = name.clone();
        self.register_factory(
            name,
            Arc::new(move |global: &CacheConfig| -> Result<Arc<dyn CacheHandle>> {
                let cache = configure(Cache::builder(cache_name.clone()))
                    .with_defaults(global)
                    .build()?;
                Ok(cache as Arc<dyn CacheHandle>)
            }),
        );
    }

    /// Registers a [`StreamCache`] built by `configure` on top of the global defaults.
    pub fn register_stream_cache<E, F>(&self, name: impl Into<String>, configure: F)
    where
        E: Clone + Send + Sync + 'static,
        F: Fn(StreamCacheBuilder<E>) -> StreamCacheBuilder<E> + Send + Sync + 'static,
    {
        let name = name.into();
        let cache_name = name.clone();
        self.register_factory(
            name,
            Arc::new(move |global: &CacheConfig| -> Result<Arc<dyn CacheHandle>> {
                let cache = configure(StreamCache::builder(cache_name.clone()))
                    .with_defaults(global)
                    .build()?;
                Ok(cache as Arc<dyn CacheHandle>)
            }),
        );
    }

    // == Lookup ==
    /// Returns the constructed cache named `name` without constructing it.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn CacheHandle>> {
        self.caches.read().get(name).cloned()
    }

    pub fn is_constructed(&self, name: &str) -> bool {
        self.caches.read().contains_key(name)
    }

    // == Get Or Create ==
    /// Returns the cache named `name`, constructing it from its factory if needed.
    ///
    /// Listeners parked for `name` are attached to a newly constructed cache.
    ///
    /// # Errors
    /// - [`CacheError::UnknownCache`] if no factory is registered under `name`
    /// - any error returned by the factory
    pub fn get_or_create(&self, name: &str) -> Result<Arc<dyn CacheHandle>> {
        if let Some(cache) = self.lookup(name) {
            return Ok(cache);
        }

        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::UnknownCache(name.to_string()))?;
        let global = self.global_config();
        let created = factory(&global)?;

        let raced = {
            let mut caches = self.caches.write();
            match caches.get(name) {
                Some(existing) => Some(Arc::clone(existing)),
                None => {
                    caches.insert(name.to_string(), Arc::clone(&created));
                    None
                }
            }
        };
        // Lost a construction race; keep the first instance
        if let Some(existing) = raced {
            created.dispose();
            return Ok(existing);
        }
        let cache = created;

        let parked = self.deferred.lock().remove(name).unwrap_or_default();
        for listener in parked {
            cache.attach(listener);
        }
        info!(cache = %name, "cache constructed");
        Ok(cache)
    }

    /// Resolves every name, skipping those without a cache or factory.
    pub fn get_or_create_all(&self, names: &[&str]) -> Vec<Arc<dyn CacheHandle>> {
        names
            .iter()
            .filter_map(|name| match self.get_or_create(name) {
                Ok(cache) => Some(cache),
                Err(err) => {
                    warn!(cache = %name, "Cache unavailable: {}", err);
                    None
                }
            })
            .collect()
    }

    /// Typed access to a [`Cache`].
    ///
    /// # Errors
    /// [`CacheError::TypeMismatch`] if `name` is not a `Cache<E>`, plus the
    /// errors of [`CacheRegistry::get_or_create`].
    pub fn cache<E>(&self, name: &str) -> Result<Arc<Cache<E>>>
    where
        E: Clone + Send + Sync + 'static,
    {
        self.get_or_create(name)?
            .into_any()
            .downcast::<Cache<E>>()
            .map_err(|_| CacheError::TypeMismatch(name.to_string()))
    }

    /// Typed access to a [`StreamCache`].
    ///
    /// # Errors
    /// Same as [`CacheRegistry::cache`].
    pub fn stream_cache<E>(&self, name: &str) -> Result<Arc<StreamCache<E>>>
    where
        E: Clone + Send + Sync + 'static,
    {
        self.get_or_create(name)?
            .into_any()
            .downcast::<StreamCache<E>>()
            .map_err(|_| CacheError::TypeMismatch(name.to_string()))
    }

    /// All constructed caches.
    pub fn all_caches(&self) -> Vec<Arc<dyn CacheHandle>> {
        self.caches.read().values().cloned().collect()
    }

    /// Disposes every constructed cache and forgets the instances.
    ///
    /// Factories stay registered, so later lookups construct fresh caches.
    pub fn dispose_all(&self) {
        let caches: Vec<Arc<dyn CacheHandle>> =
            self.caches.write().drain().map(|(_, cache)| cache).collect();
        for cache in caches {
            cache.dispose();
        }
    }

    // == Deferred Listeners ==
    /// Attaches `listeners` to the cache named `name` now if it is
    /// constructed, or as soon as it is.
    pub fn register_deferred_listeners(&self, name: &str, listeners: Vec<DeferredListener>) {
        let existing = {
            let mut deferred = self.deferred.lock();
            match self.lookup(name) {
                Some(cache) => cache,
                None => {
                    debug!(cache = %name, count = listeners.len(), "parked listeners");
                    deferred.entry(name.to_string()).or_default().extend(listeners);
                    return;
                }
            }
        };
        for listener in listeners {
            existing.attach(listener);
        }
    }

    // == Cascade Invalidation ==
    /// Clears the whole `target` cache whenever any of `dependents` is
    /// invalidated or updated, for any key.
    ///
    /// The target is resolved when a dependent fires, so neither side needs
    /// to be constructed yet.
    pub fn apply_cascade_invalidation(self: &Arc<Self>, target: &str, dependents: &[&str]) {
        let registry = Arc::downgrade(self);
        let target_name = target.to_string();
        let invalidate_target: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            match registry.get_or_create(&target_name) {
                Ok(cache) => {
                    debug!(cache = %target_name, "cascade INVALIDATE ALL");
                    cache.invalidate_all();
                }
                Err(err) => warn!(cache = %target_name, "Cascade target unavailable: {}", err),
            }
        });

        for dependent in dependents {
            let on_invalidate = Arc::clone(&invalidate_target);
            let on_change = Arc::clone(&invalidate_target);
            self.register_deferred_listeners(
                dependent,
                vec![
                    DeferredListener::Invalidate(Arc::new(move |_: &InvalidationInfo| {
                        on_invalidate()
                    })),
                    DeferredListener::Change(Arc::new(move |_: &str| on_change())),
                ],
            );
        }
        info!(cache = %target, dependents = ?dependents, "cascade invalidation applied");
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry_with(names: &[&str]) -> Arc<CacheRegistry> {
        let registry = CacheRegistry::new();
        for name in names {
            registry.register_cache::<String, _>(*name, |builder| builder);
        }
        registry
    }

    #[test]
    fn test_lookup_does_not_construct() {
        let registry = registry_with(&["users"]);

        assert!(registry.lookup("users").is_none());
        assert!(!registry.is_constructed("users"));

        registry.get_or_create("users").unwrap();
        assert!(registry.lookup("users").is_some());
        assert_eq!(registry.all_caches().len(), 1);
    }

    #[test]
    fn test_factory_runs_once() {
        let registry = CacheRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry.register_factory(
            "users",
            Arc::new(move |global: &CacheConfig| -> Result<Arc<dyn CacheHandle>> {
                counter.fetch_add(1, Ordering::SeqCst);
                let cache = Cache::<String>::builder("users").with_defaults(global).build()?;
                Ok(cache as Arc<dyn CacheHandle>)
            }),
        );

        registry.get_or_create("users").unwrap();
        registry.get_or_create("users").unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_cache() {
        let registry = CacheRegistry::new();
        assert!(matches!(
            registry.get_or_create("missing"),
            Err(CacheError::UnknownCache(_))
        ));
    }

    #[test]
    fn test_typed_access() {
        let registry = registry_with(&["users"]);

        let cache = registry.cache::<String>("users").unwrap();
        cache.put("k", "v".to_string());

        let again = registry.cache::<String>("users").unwrap();
        assert_eq!(again.get("k"), Some("v".to_string()));
        assert!(matches!(
            registry.cache::<u64>("users"),
            Err(CacheError::TypeMismatch(_))
        ));
        assert!(matches!(
            registry.stream_cache::<String>("users"),
            Err(CacheError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_global_config_is_inherited() {
        let registry = CacheRegistry::new();
        registry
            .set_global_config(CacheConfig {
                max_size: Some(1),
                ..CacheConfig::default()
            })
            .unwrap();
        registry.register_cache::<String, _>("tiny", |builder| builder);

        let cache = registry.cache::<String>("tiny").unwrap();
        cache.put("a", "1".to_string());
        cache.put("b", "2".to_string());

        assert_eq!(cache.size(), 1);
        assert_eq!(cache.config().max_size, Some(1));
    }

    #[test]
    fn test_invalid_global_config_is_rejected() {
        let registry = CacheRegistry::new();
        let result = registry.set_global_config(CacheConfig {
            expire_after_access: Some(0),
            ..CacheConfig::default()
        });

        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
        assert_eq!(registry.global_config(), CacheConfig::default());
    }

    #[test]
    fn test_cascade_on_constructed_dependent() {
        let registry = registry_with(&["users", "user-list"]);
        let users = registry.cache::<String>("users").unwrap();
        let list = registry.cache::<String>("user-list").unwrap();
        list.put("all", "alice,bob".to_string());
        list.put("active", "alice".to_string());

        registry.apply_cascade_invalidation("user-list", &["users"]);
        users.put("1", "alice".to_string());
        users.invalidate("1");

        assert_eq!(list.size(), 0);
    }

    #[test]
    fn test_cascade_on_invalidate_all() {
        let registry = registry_with(&["users", "user-list"]);
        registry.apply_cascade_invalidation("user-list", &["users"]);
        let users = registry.cache::<String>("users").unwrap();
        let list = registry.cache::<String>("user-list").unwrap();
        list.put("all", "alice".to_string());

        users.invalidate_all();

        assert_eq!(list.size(), 0);
    }

    #[test]
    fn test_cascade_parks_listeners_until_construction() {
        let registry = registry_with(&["users", "user-list"]);
        registry.apply_cascade_invalidation("user-list", &["users"]);
        assert!(!registry.is_constructed("users"));

        let list = registry.cache::<String>("user-list").unwrap();
        list.put("all", "alice".to_string());

        let users = registry.cache::<String>("users").unwrap();
        users.put("2", "bob".to_string());

        assert_eq!(list.size(), 0);
    }

    #[test]
    fn test_cascade_missing_invalidation_is_silent() {
        let registry = registry_with(&["users", "user-list"]);
        registry.apply_cascade_invalidation("user-list", &["users"]);
        let users = registry.cache::<String>("users").unwrap();
        let list = registry.cache::<String>("user-list").unwrap();
        list.put("all", "alice".to_string());

        users.invalidate("absent");

        assert_eq!(list.size(), 1);
    }

    #[test]
    fn test_dispose_all_forgets_instances() {
        let registry = registry_with(&["users"]);
        let first = registry.cache::<String>("users").unwrap();
        first.put("k", "v".to_string());

        registry.dispose_all();
        assert!(!registry.is_constructed("users"));

        let second = registry.cache::<String>("users").unwrap();
        assert_eq!(second.get("k"), None);
    }
}
