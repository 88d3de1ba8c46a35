//! Listener Module
//!
//! Callback shapes fired by caches on invalidation, update and loading.

use std::sync::Arc;

/// Payload of an invalidation notification.
///
/// `key` is `None` and `all` is `true` when the whole cache was cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationInfo {
    pub key: Option<String>,
    pub all: bool,
}

impl InvalidationInfo {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            all: false,
        }
    }

    pub fn all() -> Self {
        Self {
            key: None,
            all: true,
        }
    }
}

/// Payload of an update notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo<E> {
    pub key: String,
    pub value: E,
}

pub type InvalidateListener = Arc<dyn Fn(&InvalidationInfo) + Send + Sync>;

pub type UpdateListener<E> = Arc<dyn Fn(&UpdateInfo<E>) + Send + Sync>;

/// Value-agnostic update listener. Receives only the updated key.
pub type ChangeListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Receives `true` when a stream source starts running and `false` when it stops.
pub type LoadingListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Listener parked for a cache that has not been constructed yet.
#[derive(Clone)]
pub enum DeferredListener {
    Invalidate(InvalidateListener),
    Change(ChangeListener),
}

impl std::fmt::Debug for DeferredListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeferredListener::Invalidate(_) => f.write_str("DeferredListener::Invalidate"),
            DeferredListener::Change(_) => f.write_str("DeferredListener::Change"),
        }
    }
}
