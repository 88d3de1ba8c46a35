//! Cache Module
//!
//! Provides named in-memory caches with LRU eviction, write/access expiry and
//! invalidation listeners.

mod entry;
mod eviction;
mod handle;
mod listener;
mod lru;
mod stats;
mod sync_cache;


// Re-export public types
pub use entry::CacheEntry;
pub use eviction::{DropListener, EvictionController};
pub use handle::CacheHandle;
pub use listener::{
    ChangeListener, DeferredListener, InvalidateListener, InvalidationInfo, LoadingListener,
    UpdateInfo, UpdateListener,
};
pub use lru::LruIndex;
pub use stats::CacheStats;
pub use sync_cache::{Cache, CacheBuilder, UnlessCondition};
