//! Storage Module
//!
//! Backing stores for cache entries. A store is a plain key/entry map; expiry and
//! capacity are layered on top by the cache.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::InMemoryStorage;

use crate::cache::CacheEntry;

// == Storage Contract ==
/// Key/entry map backing a single cache.
///
/// `get` takes `&mut self` so decorators may repair internal bookkeeping on read.
pub trait Storage<E>: Send {
    /// Returns the entry for `key`, if any.
    fn get(&mut self, key: &str) -> Option<CacheEntry<E>>;

    /// Inserts or replaces the entry for `key`.
    fn put(&mut self, key: &str, entry: CacheEntry<E>);

    /// Removes the entry for `key`. Returns the removed entry.
    fn remove(&mut self, key: &str) -> Option<CacheEntry<E>>;

    /// Removes every entry.
    fn clear(&mut self);

    /// Number of stored entries, expired ones included.
    fn size(&mut self) -> usize;

    /// All stored `(key, entry)` pairs in no particular order.
    fn entries(&mut self) -> Vec<(String, CacheEntry<E>)>;
}
