//! Volatile in-memory storage.

use std::collections::HashMap;

use crate::cache::CacheEntry;
use crate::storage::Storage;

/// HashMap backed storage. Contents are lost with the process.
#[derive(Debug)]
pub struct InMemoryStorage<E> {
    entries: HashMap<String, CacheEntry<E>>,
}

impl<E> InMemoryStorage<E> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<E> Default for InMemoryStorage<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send> Storage<E> for InMemoryStorage<E> {
    fn get(&mut self, key: &str) -> Option<CacheEntry<E>> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, entry: CacheEntry<E>) {
        self.entries.insert(key.to_string(), entry);
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<E>> {
        self.entries.remove(key)
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn size(&mut self) -> usize {
        self.entries.len()
    }

    fn entries(&mut self) -> Vec<(String, CacheEntry<E>)> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let mut storage = InMemoryStorage::new();

        storage.put("key1", CacheEntry::new("value1".to_string(), 0));
        assert_eq!(storage.get("key1").unwrap().value, "value1");
        assert_eq!(storage.size(), 1);

        let removed = storage.remove("key1").unwrap();
        assert_eq!(removed.value, "value1");
        assert!(storage.get("key1").is_none());
        assert!(storage.remove("key1").is_none());
    }

    #[test]
    fn test_overwrite_and_clear() {
        let mut storage = InMemoryStorage::new();

        storage.put("key1", CacheEntry::new(1, 0));
        storage.put("key1", CacheEntry::new(2, 5));
        storage.put("key2", CacheEntry::new(3, 5));

        assert_eq!(storage.size(), 2);
        assert_eq!(storage.get("key1").unwrap().value, 2);

        storage.clear();
        assert_eq!(storage.size(), 0);
        assert!(storage.entries().is_empty());
    }

    #[test]
    fn test_unit_value_is_stored() {
        let mut storage = InMemoryStorage::new();
        storage.put("void", CacheEntry::new((), 0));

        assert!(storage.get("void").is_some());
        assert!(storage.get("other").is_none());
    }
}
