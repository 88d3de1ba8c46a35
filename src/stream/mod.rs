//! Stream Cache Module
//!
//! A cache holding one continuously updated value per cache name, shared by
//! every subscriber and refreshed from its source on demand.

mod driver;
mod stream_cache;

use futures::stream::BoxStream;

pub use stream_cache::{StreamCache, StreamCacheBuilder, StreamSupplier};

/// Stream of values delivered to one subscriber.
pub type ValueStream<E> = BoxStream<'static, E>;

/// Backing storage key under which the last value is persisted.
pub const STORAGE_KEY: &str = "";

/// Lifecycle of a [`StreamCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No stream has been requested yet
    Uninitialized,
    /// No source is running
    Idle,
    /// The source is running; subscribers wait for its result
    Loading,
    /// No further requests are accepted
    Disposed,
}

pub(crate) enum StreamRequest<E> {
    Refresh,
    Update(E),
}

/// Value broadcast to subscribers.
///
/// `version` grows with every published value so a subscriber never receives
/// the same value twice.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot<E> {
    pub(crate) value: Option<E>,
    pub(crate) loading: bool,
    pub(crate) version: u64,
}
