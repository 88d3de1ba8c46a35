//! Expiry Cleanup Task
//!
//! Background task that periodically removes expired cache entries.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::Cache;

/// Spawns a background task that periodically removes expired entries from `cache`.
///
/// Expiry is otherwise only enforced on read, so without this task expired
/// entries keep occupying capacity until they are looked up. The task stops on
/// its own once the cache is dropped.
///
/// # Arguments
/// * `cache` - cache to sweep
/// * `interval` - time between cleanup runs
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task.
///
/// # Example
/// ```ignore
/// let cache = Cache::<String>::builder("users").expire_after_write(60_000).build()?;
/// let cleanup_handle = spawn_cleanup_task(&cache, Duration::from_secs(1));
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task<E>(cache: &Arc<Cache<E>>, interval: Duration) -> JoinHandle<()>
where
    E: Clone + Send + Sync + 'static,
{
    let cache: Weak<Cache<E>> = Arc::downgrade(cache);

    tokio::spawn(async move {
        info!(
            "Starting expiry cleanup task with interval of {} ms",
            interval.as_millis()
        );

        loop {
            tokio::time::sleep(interval).await;

            let Some(cache) = cache.upgrade() else {
                debug!("Cache dropped, stopping expiry cleanup task");
                break;
            };
            let removed = cache.cleanup_expired();

            if removed > 0 {
                info!(cache = %cache.name(), "Expiry cleanup: removed {} expired entries", removed);
            } else {
                debug!(cache = %cache.name(), "Expiry cleanup: no expired entries found");
            }
        }
    })
}
