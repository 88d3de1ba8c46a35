//! External Invalidation Task
//!
//! Background task that clears a cache whenever an external signal fires.

use std::sync::Weak;

use futures::{Stream, StreamExt};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheHandle;
use crate::error::{CacheError, Result};

/// Spawns a task that calls `invalidate_all` on `target` for every item of `signal`.
///
/// The task holds only a weak reference, so it never keeps a cache alive. It
/// stops when the signal ends or the cache is dropped; abort the returned
/// handle to stop it earlier.
///
/// # Errors
/// Returns [`CacheError::NoRuntime`] when called outside a tokio runtime.
pub fn spawn_invalidation_task<S>(target: Weak<dyn CacheHandle>, signal: S) -> Result<JoinHandle<()>>
where
    S: Stream + Send + 'static,
{
    let runtime = Handle::try_current().map_err(|_| CacheError::NoRuntime)?;

    Ok(runtime.spawn(async move {
        let mut signal = Box::pin(signal);
        while signal.next().await.is_some() {
            let Some(cache) = target.upgrade() else {
                break;
            };
            info!(cache = %cache.name(), "External signal received, invalidating cache");
            cache.invalidate_all();
        }
        debug!("Invalidation signal finished");
    }))
}
