//! memocache demo
//!
//! Walks through the cache engine: coalesced loads, cascading invalidation,
//! expiry cleanup and a stream cache, logging every step.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memocache::{
    generate_key, spawn_cleanup_task, CacheConfig, CacheRegistry, CacheService,
    InvalidationOptions, Source,
};

/// Entry point of the demo.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load global cache defaults from environment variables
/// 3. Register caches and the cascade between them
/// 4. Run coalesced loads, an invalidation and a stream cache
/// 5. Print cache statistics
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memocache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CacheConfig::from_env()?;
    info!(
        "Configuration loaded: max_size={:?}, expire_after_write={:?}ms, expire_after_access={:?}ms",
        config.max_size, config.expire_after_write, config.expire_after_access
    );

    let registry = Arc::new(CacheRegistry::with_config(config));
    registry.register_cache::<String, _>("users", |builder| builder.expire_after_write(30_000));
    registry.register_cache::<Vec<String>, _>("user-list", |builder| builder.max_size(16));
    registry.register_stream_cache::<String, _>("motd", |builder| builder);
    registry.apply_cascade_invalidation("user-list", &["users"]);

    let service = CacheService::new(Arc::clone(&registry));

    let users = registry.cache::<String>("users")?;
    let cleanup_handle = spawn_cleanup_task(&users, Duration::from_secs(1));

    // Concurrent identical loads share one evaluation
    let evaluations = Arc::new(AtomicUsize::new(0));
    let key = generate_key(&[serde_json::json!(42)]);
    let loads: Vec<_> = (0..5)
        .map(|_| {
            let evaluations = Arc::clone(&evaluations);
            service.load("users", &key, move || {
                Source::deferred(async move {
                    evaluations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok("Ada Lovelace".to_string())
                })
            })
        })
        .collect();
    for result in futures::future::join_all(loads).await {
        info!("Loaded user: {}", result?);
    }
    info!(
        "Source evaluated {} time(s) for 5 loads",
        evaluations.load(Ordering::SeqCst)
    );

    let list = service
        .load("user-list", "all", || {
            Source::value(vec!["Ada Lovelace".to_string(), "Alan Turing".to_string()])
        })
        .await?;
    info!("Loaded user list with {} entries", list.len());

    // Saving a user invalidates it, which cascades into the user list
    service
        .invalidate(
            &["users"],
            &key,
            async { Ok::<_, anyhow::Error>(()) },
            InvalidationOptions::default(),
        )
        .await?;
    info!("user-list holds {} entries after cascade", service.size("user-list")?);

    let mut motd = service.stream("motd", "today", || {
        Source::value("Welcome to memocache".to_string())
    })?;
    if let Some(message) = motd.next().await {
        info!("Stream value: {}", message);
    }
    registry.stream_cache::<String>("motd")?.put("today", "Cache all the things".to_string());
    if let Some(message) = motd.next().await {
        info!("Stream value: {}", message);
    }

    info!("users stats: {}", serde_json::to_string(&users.stats())?);

    cleanup_handle.abort();
    registry.dispose_all();
    info!("Demo complete");
    Ok(())
}
