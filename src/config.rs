//! Configuration Module
//!
//! Global cache defaults, loaded from environment variables or deserialized.

use std::env;

use serde::Deserialize;

use crate::error::{CacheError, Result};

/// Default limits applied to caches that do not configure their own.
///
/// Every limit is optional; `None` means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries a cache can hold
    pub max_size: Option<usize>,
    /// Time-to-live in milliseconds measured from write
    pub expire_after_write: Option<u64>,
    /// Time-to-live in milliseconds measured from last successful read
    pub expire_after_access: Option<u64>,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_SIZE` - Maximum cache entries (default: unbounded)
    /// - `CACHE_EXPIRE_AFTER_WRITE_MS` - Write TTL in milliseconds (default: none)
    /// - `CACHE_EXPIRE_AFTER_ACCESS_MS` - Access TTL in milliseconds (default: none)
    ///
    /// # Errors
    /// [`CacheError::InvalidConfig`] when a variable is set but is not a
    /// positive integer.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            max_size: parse_limit("CACHE_MAX_SIZE")?,
            expire_after_write: parse_limit("CACHE_EXPIRE_AFTER_WRITE_MS")?,
            expire_after_access: parse_limit("CACHE_EXPIRE_AFTER_ACCESS_MS")?,
        };
        config.validate()?;
        Ok(config)
    }

    // == Validate ==
    /// Rejects any configured limit lower than 1.
    pub fn validate(&self) -> Result<()> {
        validate_limit("max_size", self.max_size.map(|v| v as u64))?;
        validate_limit("expire_after_write", self.expire_after_write)?;
        validate_limit("expire_after_access", self.expire_after_access)?;
        Ok(())
    }

    /// Returns a copy where every unset limit is taken from `defaults`.
    pub fn or(&self, defaults: &CacheConfig) -> CacheConfig {
        CacheConfig {
            max_size: self.max_size.or(defaults.max_size),
            expire_after_write: self.expire_after_write.or(defaults.expire_after_write),
            expire_after_access: self.expire_after_access.or(defaults.expire_after_access),
        }
    }
}

/// Reads an optional limit; unset means `None`, anything unparsable is an error.
fn parse_limit<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            CacheError::InvalidConfig(format!(
                "Invalid {} value {}. Must be a positive number greater than zero",
                name, raw
            ))
        }),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(CacheError::InvalidConfig(format!(
            "Invalid {} value. Must be valid unicode",
            name
        ))),
    }
}

fn validate_limit(name: &str, value: Option<u64>) -> Result<()> {
    match value {
        Some(v) if v < 1 => Err(CacheError::InvalidConfig(format!(
            "Invalid {} value {}. Must be a positive number greater than zero",
            name, v
        ))),
        _ => Ok(()),
    }
}
