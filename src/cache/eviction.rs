//! Eviction Controller Module
//!
//! Storage decorator that enforces a maximum entry count with LRU ordering.

use std::fmt;
use std::sync::Arc;

use crate::cache::{CacheEntry, LruIndex};
use crate::storage::Storage;

/// Called with the key and entry dropped to make room for a new write.
pub type DropListener<E> = Arc<dyn Fn(&str, &CacheEntry<E>) + Send + Sync>;

// == Eviction Controller ==
/// Wraps a [`Storage`] and keeps at most `max_size` entries in it.
///
/// The key set of the index always equals the key set of the wrapped storage.
/// Reads never promote a key; the cache layer promotes by re-writing the
/// entry with a fresh access time.
pub struct EvictionController<E> {
    storage: Box<dyn Storage<E>>,
    index: LruIndex,
    max_size: usize,
    on_drop: Option<DropListener<E>>,
}

impl<E> fmt::Debug for EvictionController<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvictionController")
            .field("index", &self.index)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

impl<E> EvictionController<E> {
    // == Constructor ==
    /// Wraps `storage`, importing its existing entries by ascending access time.
    ///
    /// Entries dropped while importing an over-full storage are not reported
    /// to the drop listener.
    pub fn new(
        mut storage: Box<dyn Storage<E>>,
        max_size: usize,
        on_drop: Option<DropListener<E>>,
    ) -> Self {
        let mut existing = storage.entries();
        existing.sort_by_key(|(_, entry)| entry.accessed);

        let mut controller = Self {
            storage,
            index: LruIndex::new(),
            max_size,
            on_drop,
        };
        for (key, _) in existing {
            controller.index.touch(&key);
            controller.enforce_max_size(false);
        }
        controller
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Keys ordered from most to least recently used.
    pub fn recency(&self) -> Vec<String> {
        self.index.keys()
    }

    fn enforce_max_size(&mut self, notify: bool) {
        if self.index.len() <= self.max_size {
            return;
        }
        let Some(oldest) = self.index.evict_oldest() else {
            return;
        };
        if let Some(entry) = self.storage.remove(&oldest) {
            if notify {
                if let Some(listener) = &self.on_drop {
                    listener(&oldest, &entry);
                }
            }
        }
    }
}

impl<E: Send> Storage<E> for EvictionController<E> {
    fn get(&mut self, key: &str) -> Option<CacheEntry<E>> {
        if !self.index.contains(key) {
            return None;
        }
        let entry = self.storage.get(key);
        if entry.is_none() {
            // Index and storage disagree
            self.index.remove(key);
        }
        entry
    }

    fn put(&mut self, key: &str, entry: CacheEntry<E>) {
        self.index.touch(key);
        self.storage.put(key, entry);
        self.enforce_max_size(true);
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<E>> {
        self.index.remove(key);
        self.storage.remove(key)
    }

    fn clear(&mut self) {
        self.index.clear();
        self.storage.clear();
    }

    fn size(&mut self) -> usize {
        self.storage.size()
    }

    fn entries(&mut self) -> Vec<(String, CacheEntry<E>)> {
        self.storage.entries()
    }
}
