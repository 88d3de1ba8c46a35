//! Background Tasks Module
//!
//! Tasks that run alongside caches.
//!
//! # Tasks
//! - Expiry cleanup: removes expired entries at a configured interval
//! - External invalidation: clears a cache whenever a signal stream yields

mod cleanup;
mod invalidation;

pub use cleanup::spawn_cleanup_task;
pub use invalidation::spawn_invalidation_task;
