//! File mirrored storage.
//!
//! Keeps entries in memory and mirrors every mutation to a JSON file named
//! `<prefix>.<cacheName>.json`. The file is read lazily on first access.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::cache::CacheEntry;
use crate::error::{CacheError, Result};
use crate::storage::{InMemoryStorage, Storage};

#[derive(Serialize, Deserialize)]
struct StoredPair<E> {
    key: String,
    value: CacheEntry<E>,
}

// == File Storage ==
/// Storage that survives process restarts on a best-effort basis.
///
/// Persistence failures are logged and never surface through the [`Storage`]
/// contract; call [`FileStorage::flush`] to observe them.
#[derive(Debug)]
pub struct FileStorage<E> {
    storage_key: String,
    path: PathBuf,
    storage: Option<InMemoryStorage<E>>,
}

impl<E> FileStorage<E>
where
    E: Clone + Send + Serialize + DeserializeOwned,
{
    /// Creates a storage mirrored to `<dir>/<prefix>.<cache_name>.json`.
    pub fn new(dir: impl AsRef<Path>, prefix: &str, cache_name: &str) -> Self {
        let storage_key = format!("{}.{}", prefix, cache_name);
        let path = dir.as_ref().join(format!("{}.json", storage_key));
        Self {
            storage_key,
            path,
            storage: None,
        }
    }

    /// Persistence key, `<prefix>.<cacheName>`.
    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // == Flush ==
    /// Writes the current contents to disk, reporting any failure.
    pub fn flush(&mut self) -> Result<()> {
        let pairs: Vec<StoredPair<E>> = self
            .loaded()
            .entries()
            .into_iter()
            .map(|(key, value)| StoredPair { key, value })
            .collect();

        if pairs.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(CacheError::Storage(format!(
                    "{}: {}",
                    self.path.display(),
                    err
                ))),
            };
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| CacheError::Storage(format!("{}: {}", parent.display(), err)))?;
        }
        let bytes = serde_json::to_vec(&pairs)
            .map_err(|err| CacheError::Storage(format!("{}: {}", self.storage_key, err)))?;
        fs::write(&self.path, bytes)
            .map_err(|err| CacheError::Storage(format!("{}: {}", self.path.display(), err)))
    }

    fn persist(&mut self) {
        if let Err(err) = self.flush() {
            error!(storage_key = %self.storage_key, "Failed to persist cache storage: {}", err);
        }
    }

    fn loaded(&mut self) -> &mut InMemoryStorage<E> {
        if self.storage.is_none() {
            self.storage = Some(self.restore());
        }
        self.storage.get_or_insert_with(InMemoryStorage::new)
    }

    // Replays persisted pairs through `put`.
    fn restore(&self) -> InMemoryStorage<E> {
        let mut storage = InMemoryStorage::new();
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return storage,
            Err(err) => {
                error!(storage_key = %self.storage_key, "Error reading cache storage: {}", err);
                return storage;
            }
        };
        match serde_json::from_slice::<Vec<StoredPair<E>>>(&bytes) {
            Ok(pairs) => {
                debug!(storage_key = %self.storage_key, entries = pairs.len(), "Restored cache storage");
                for pair in pairs {
                    storage.put(&pair.key, pair.value);
                }
            }
            Err(err) => {
                error!(storage_key = %self.storage_key, "Error parsing cache storage: {}", err);
            }
        }
        storage
    }
}

impl<E> Storage<E> for FileStorage<E>
where
    E: Clone + Send + Serialize + DeserializeOwned,
{
    fn get(&mut self, key: &str) -> Option<CacheEntry<E>> {
        self.loaded().get(key)
    }

    fn put(&mut self, key: &str, entry: CacheEntry<E>) {
        self.loaded().put(key, entry);
        self.persist();
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<E>> {
        let removed = self.loaded().remove(key);
        if removed.is_some() {
            self.persist();
        }
        removed
    }

    fn clear(&mut self) {
        self.loaded().clear();
        self.persist();
    }

    fn size(&mut self) -> usize {
        self.loaded().size()
    }

    fn entries(&mut self) -> Vec<(String, CacheEntry<E>)> {
        self.loaded().entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let storage: FileStorage<String> = FileStorage::new(dir.path(), "app", "users");

        assert_eq!(storage.storage_key(), "app.users");
        assert_eq!(storage.path(), dir.path().join("app.users.json"));
    }

    #[test]
    fn test_mirror_survives_reconstruction() {
        let dir = tempfile::tempdir().unwrap();

        {
            let mut storage = FileStorage::new(dir.path(), "app", "users");
            storage.put("a", CacheEntry::new("alice".to_string(), 10));
            storage.put("b", CacheEntry::new("bob".to_string(), 20));
            storage.remove("b");
        }

        let mut restored: FileStorage<String> = FileStorage::new(dir.path(), "app", "users");
        assert_eq!(restored.size(), 1);
        let entry = restored.get("a").unwrap();
        assert_eq!(entry.value, "alice");
        assert_eq!(entry.created, 10);
        assert!(restored.get("b").is_none());
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path(), "app", "numbers");

        storage.put("one", CacheEntry::new(1u32, 0));
        assert!(storage.path().exists());

        storage.clear();
        assert!(!storage.path().exists());
        assert_eq!(storage.size(), 0);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.broken.json"), b"not json").unwrap();

        let mut storage: FileStorage<u32> = FileStorage::new(dir.path(), "app", "broken");
        assert_eq!(storage.size(), 0);

        storage.put("k", CacheEntry::new(7, 0));
        let mut restored: FileStorage<u32> = FileStorage::new(dir.path(), "app", "broken");
        assert_eq!(restored.get("k").unwrap().value, 7);
    }

    #[test]
    fn test_caches_do_not_share_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = FileStorage::new(dir.path(), "app", "first");
        let mut second: FileStorage<u32> = FileStorage::new(dir.path(), "app", "second");

        first.put("k", CacheEntry::new(1u32, 0));
        assert!(second.get("k").is_none());
    }
}
