//! memocache - In-process memoization cache
//!
//! Caches the results of value, future and stream sources by key, with LRU
//! capacity limits, write and access expiry, coalescing of concurrent loads,
//! cascading invalidation between caches and continuously updated stream caches.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod key;
pub mod registry;
pub mod service;
pub mod source;
pub mod storage;
pub mod stream;
pub mod tasks;

pub use cache::{
    Cache, CacheBuilder, CacheEntry, CacheHandle, CacheStats, InvalidationInfo, UpdateInfo,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use executor::{CacheExecutor, InvalidationOptions, SharedLoad};
pub use key::{generate_key, resolve_params, CacheParam};
pub use registry::CacheRegistry;
pub use service::CacheService;
pub use source::Source;
pub use storage::{FileStorage, InMemoryStorage, Storage};
pub use stream::{StreamCache, StreamState, ValueStream};
pub use tasks::{spawn_cleanup_task, spawn_invalidation_task};
