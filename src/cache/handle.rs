//! Type-erased view of a cache, used where the value type does not matter.

use std::any::Any;
use std::sync::Arc;

use crate::cache::{ChangeListener, DeferredListener, InvalidateListener};

/// Operations every cache supports regardless of its value type.
///
/// The registry stores caches behind this trait and downcasts through
/// [`CacheHandle::into_any`] when a typed cache is requested.
pub trait CacheHandle: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Removes a single key, notifying invalidate listeners if it was present.
    fn invalidate(&self, key: &str);

    /// Clears the cache and notifies invalidate listeners.
    fn invalidate_all(&self);

    fn size(&self) -> usize;

    fn add_invalidate_listener(&self, listener: InvalidateListener);

    /// Registers an update listener that only observes the updated key.
    fn add_change_listener(&self, listener: ChangeListener);

    /// Releases external subscriptions held by the cache.
    fn dispose(&self);

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn attach(&self, listener: DeferredListener) {
        match listener {
            DeferredListener::Invalidate(listener) => self.add_invalidate_listener(listener),
            DeferredListener::Change(listener) => self.add_change_listener(listener),
        }
    }
}
