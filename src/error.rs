//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
///
/// The type is `Clone` because a single source failure is shared with every
/// caller that joined the same in-flight operation.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Invalid cache or global configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The source operation failed
    #[error("Source failed: {0}")]
    Source(Arc<anyhow::Error>),

    /// A stream source completed without emitting a value
    #[error("Source completed without a value")]
    EmptySource,

    /// No cache instance or factory is registered under this name
    #[error("Unknown cache: {0}")]
    UnknownCache(String),

    /// The cache exists but holds a different value type
    #[error("Cache type mismatch: {0}")]
    TypeMismatch(String),

    /// The cache has been disposed
    #[error("Cache disposed: {0}")]
    Disposed(String),

    /// A background task was requested outside of a tokio runtime
    #[error("No tokio runtime available")]
    NoRuntime,

    /// Persistence mirror failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CacheError {
    /// Wraps a caller supplied error as a source failure.
    pub fn source(err: impl Into<anyhow::Error>) -> Self {
        CacheError::Source(Arc::new(err.into()))
    }
}

impl From<anyhow::Error> for CacheError {
    fn from(err: anyhow::Error) -> Self {
        CacheError::Source(Arc::new(err))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
