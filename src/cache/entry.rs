//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with write and access timestamps.

use serde::{Deserialize, Serialize};

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry<E> {
    /// The stored value
    pub value: E,
    /// Write timestamp (Unix milliseconds), fixed for the life of the entry
    pub created: u64,
    /// Last successful read timestamp (Unix milliseconds)
    pub accessed: u64,
}

impl<E> CacheEntry<E> {
    // == Constructor ==
    /// Creates a new entry written at `now`.
    pub fn new(value: E, now: u64) -> Self {
        Self {
            value,
            created: now,
            accessed: now,
        }
    }

    // == Touch ==
    /// Returns the same entry with its access time moved to `now`.
    pub fn touched(self, now: u64) -> Self {
        Self {
            accessed: now,
            ..self
        }
    }

    // == Is Expired ==
    /// Checks the entry against the optional write and access TTLs.
    ///
    /// Boundary condition: an entry is still valid when exactly `ttl` milliseconds
    /// have elapsed; it expires once the elapsed time is strictly greater.
    pub fn is_expired(
        &self,
        now: u64,
        expire_after_write: Option<u64>,
        expire_after_access: Option<u64>,
    ) -> bool {
        if let Some(ttl) = expire_after_write {
            if now.saturating_sub(self.created) > ttl {
                return true;
            }
        }
        if let Some(ttl) = expire_after_access {
            if now.saturating_sub(self.accessed) > ttl {
                return true;
            }
        }
        false
    }
}
