//! Stream Cache
//!
//! Keeps one live value per cache, replayed to every subscriber and
//! re-loaded from its source on invalidation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info};

use crate::cache::{
    Cache, CacheBuilder, CacheHandle, ChangeListener, InvalidateListener, LoadingListener,
};
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::source::Source;
use crate::storage::Storage;
use crate::stream::driver::StreamDriver;
use crate::stream::{Snapshot, StreamRequest, StreamState, ValueStream, STORAGE_KEY};
use crate::tasks::spawn_invalidation_task;

/// Produces the source a refresh evaluates.
pub type StreamSupplier<E> = Arc<dyn Fn() -> Source<E> + Send + Sync>;

struct ActiveStream<E> {
    key: String,
    supplier: Arc<Mutex<StreamSupplier<E>>>,
    requests: mpsc::UnboundedSender<StreamRequest<E>>,
    values: Arc<watch::Sender<Snapshot<E>>>,
    refreshes_requested: Arc<AtomicU64>,
    driver: JoinHandle<()>,
}

impl<E> ActiveStream<E> {
    fn request(&self, request: StreamRequest<E>) {
        if matches!(request, StreamRequest::Refresh) {
            // Subscribers arriving from now on must wait for the new value
            self.values.send_modify(|snapshot| {
                self.refreshes_requested.fetch_add(1, Ordering::SeqCst);
                snapshot.loading = true;
            });
        }
        if self.requests.send(request).is_err() {
            debug!("stream driver already stopped");
        }
    }
}

enum Slot<E> {
    Uninitialized,
    Active(ActiveStream<E>),
    Disposed,
}

fn subscribe<E>(values: &watch::Sender<Snapshot<E>>) -> ValueStream<E>
where
    E: Clone + Send + Sync + 'static,
{
    let mut last_seen = None;
    WatchStream::new(values.subscribe())
        .filter_map(move |snapshot| {
            let fresh = !snapshot.loading && last_seen != Some(snapshot.version);
            let value = if fresh { snapshot.value } else { None };
            if value.is_some() {
                last_seen = Some(snapshot.version);
            }
            futures::future::ready(value)
        })
        .boxed()
}

// == Stream Cache ==
/// Cache exposing one continuously updated value instead of keyed entries.
///
/// The last value is persisted under [`STORAGE_KEY`] in a backing [`Cache`],
/// so a newly created stream cache over the same storage resumes from it.
pub struct StreamCache<E> {
    name: String,
    backing: Arc<Cache<E>>,
    slot: Mutex<Slot<E>>,
    loading_listeners: Arc<RwLock<Vec<LoadingListener>>>,
    subscriptions: Mutex<Vec<JoinHandle<()>>>,
}

impl<E> fmt::Debug for StreamCache<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCache")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<E> StreamCache<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn builder(name: impl Into<String>) -> StreamCacheBuilder<E> {
        StreamCacheBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cache persisting the last published value.
    pub fn backing(&self) -> &Arc<Cache<E>> {
        &self.backing
    }

    pub fn state(&self) -> StreamState {
        match &*self.slot.lock() {
            Slot::Uninitialized => StreamState::Uninitialized,
            Slot::Disposed => StreamState::Disposed,
            Slot::Active(active) if active.values.borrow().loading => StreamState::Loading,
            Slot::Active(_) => StreamState::Idle,
        }
    }

    /// Last published value, or the persisted one before the stream starts.
    pub fn current(&self) -> Option<E> {
        if let Slot::Active(active) = &*self.slot.lock() {
            return active.values.borrow().value.clone();
        }
        self.backing.get(STORAGE_KEY)
    }

    // == Load Stream ==
    /// Subscribes to the stream, creating it on first use.
    ///
    /// # Arguments
    /// * `key` - Key of the current invocation; a different key than the
    ///   previous call swaps in `supplier` and refreshes
    /// * `supplier` - Produces the source evaluated by every refresh
    ///
    /// # Returns
    /// A new subscriber stream. It yields the current value unless a refresh
    /// is running, then every later value.
    ///
    /// # Errors
    /// - [`CacheError::Disposed`] after [`StreamCache::dispose`]
    /// - [`CacheError::NoRuntime`] when the first call happens outside tokio
    pub fn load_stream<F>(&self, key: &str, supplier: F) -> Result<ValueStream<E>>
    where
        F: Fn() -> Source<E> + Send + Sync + 'static,
    {
        let mut slot = self.slot.lock();

        match &mut *slot {
            Slot::Disposed => return Err(CacheError::Disposed(self.name.clone())),
            Slot::Active(active) => {
                if active.key != key {
                    info!(cache = %self.name, key, "stream key changed, switching source");
                    *active.supplier.lock() = Arc::new(supplier);
                    active.key = key.to_string();
                    active.request(StreamRequest::Refresh);
                }
                return Ok(subscribe(&active.values));
            }
            Slot::Uninitialized => {}
        }

        let active = self.start(key, Arc::new(supplier))?;
        let stream = subscribe(&active.values);
        *slot = Slot::Active(active);
        info!(cache = %self.name, key, "stream LOADED");
        Ok(stream)
    }

    fn start(&self, key: &str, supplier: StreamSupplier<E>) -> Result<ActiveStream<E>> {
        let runtime = Handle::try_current().map_err(|_| CacheError::NoRuntime)?;

        let initial = match self.backing.get(STORAGE_KEY) {
            Some(stored) => StreamRequest::Update(stored),
            None => StreamRequest::Refresh,
        };
        let (values, _) = watch::channel(Snapshot {
            value: None,
            loading: matches!(initial, StreamRequest::Refresh),
            version: 0,
        });
        let values = Arc::new(values);
        let refreshes_requested = Arc::new(AtomicU64::new(u64::from(matches!(
            initial,
            StreamRequest::Refresh
        ))));
        let supplier = Arc::new(Mutex::new(supplier));
        let (requests, receiver) = mpsc::unbounded_channel();
        requests
            .send(initial)
            .map_err(|_| CacheError::Disposed(self.name.clone()))?;

        let driver = StreamDriver {
            name: self.name.clone(),
            supplier: Arc::clone(&supplier),
            backing: Arc::clone(&self.backing),
            values: Arc::clone(&values),
            loading_listeners: Arc::clone(&self.loading_listeners),
            refreshes_requested: Arc::clone(&refreshes_requested),
            refreshes_seen: 0,
        };

        Ok(ActiveStream {
            key: key.to_string(),
            supplier,
            requests,
            values,
            refreshes_requested,
            driver: runtime.spawn(driver.run(receiver)),
        })
    }

    // == Put ==
    /// Publishes `value` directly, without running the source.
    ///
    /// Does nothing before the stream exists. The value is returned either way.
    pub fn put(&self, key: &str, value: E) -> E {
        if let Slot::Active(active) = &*self.slot.lock() {
            active.request(StreamRequest::Update(value.clone()));
            info!(cache = %self.name, key, "stream UPDATED");
        }
        value
    }

    /// Same as [`StreamCache::invalidate_all`]; the stream holds a single value.
    pub fn invalidate(&self, _key: &str) {
        self.invalidate_all();
    }

    // == Invalidate All ==
    /// Clears the persisted value and re-runs the source.
    pub fn invalidate_all(&self) {
        self.backing.invalidate_all();
        if let Slot::Active(active) = &*self.slot.lock() {
            active.request(StreamRequest::Refresh);
            info!(cache = %self.name, "stream INVALIDATED");
        }
    }

    /// Receives `true` when a refresh starts and `false` when it ends.
    pub fn add_loading_listener(&self, listener: LoadingListener) {
        self.loading_listeners.write().push(listener);
    }

    /// Re-runs the source every time `signal` yields an item.
    ///
    /// # Errors
    /// Fails with [`CacheError::NoRuntime`] outside a tokio runtime.
    pub fn invalidate_on<S>(self: &Arc<Self>, signal: S) -> Result<()>
    where
        S: Stream + Send + 'static,
    {
        let handle: Arc<dyn CacheHandle> = Arc::clone(self) as Arc<dyn CacheHandle>;
        let task = spawn_invalidation_task(Arc::downgrade(&handle), signal)?;
        self.subscriptions.lock().push(task);
        Ok(())
    }

    // == Dispose ==
    /// Stops the stream for good.
    ///
    /// Closes the request channel, which ends every subscriber stream, and
    /// releases external invalidation subscriptions.
    pub fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.slot.lock(), Slot::Disposed);
        if let Slot::Active(active) = previous {
            drop(active.requests);
            drop(active.driver);
        }
        for task in self.subscriptions.lock().drain(..) {
            task.abort();
        }
        self.backing.dispose();
        info!(cache = %self.name, "stream DISPOSED");
    }
}

impl<E> CacheHandle for StreamCache<E>
where
    E: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn invalidate(&self, key: &str) {
        StreamCache::invalidate(self, key)
    }

    fn invalidate_all(&self) {
        StreamCache::invalidate_all(self)
    }

    fn size(&self) -> usize {
        self.backing.size()
    }

    fn add_invalidate_listener(&self, listener: InvalidateListener) {
        self.backing.add_invalidate_listener(listener)
    }

    fn add_change_listener(&self, listener: ChangeListener) {
        CacheHandle::add_change_listener(&*self.backing, listener)
    }

    fn dispose(&self) {
        StreamCache::dispose(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

// == Stream Cache Builder ==
/// Builder for [`StreamCache`].
pub struct StreamCacheBuilder<E> {
    name: String,
    backing: CacheBuilder<E>,
    loading_listeners: Vec<LoadingListener>,
    signals: Vec<BoxStream<'static, ()>>,
}

impl<E> StreamCacheBuilder<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            backing: Cache::builder(name.clone()),
            name,
            loading_listeners: Vec::new(),
            signals: Vec::new(),
        }
    }

    /// Storage persisting the last value. Defaults to in-memory storage.
    pub fn storage(mut self, storage: impl Storage<E> + 'static) -> Self {
        self.backing = self.backing.storage(storage);
        self
    }

    pub fn with_defaults(mut self, defaults: &CacheConfig) -> Self {
        self.backing = self.backing.with_defaults(defaults);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.backing = self.backing.clock(clock);
        self
    }

    pub fn loading_listener(mut self, listener: LoadingListener) -> Self {
        self.loading_listeners.push(listener);
        self
    }

    /// Refreshes the stream whenever `signal` yields.
    pub fn invalidate_on<S>(mut self, signal: S) -> Self
    where
        S: Stream + Send + 'static,
    {
        self.signals.push(signal.map(|_| ()).boxed());
        self
    }

    /// # Errors
    /// - [`CacheError::InvalidConfig`] if an inherited limit is lower than 1
    /// - [`CacheError::NoRuntime`] if signals are configured outside a tokio runtime
    pub fn build(self) -> Result<Arc<StreamCache<E>>> {
        let cache = Arc::new(StreamCache {
            name: self.name,
            backing: self.backing.build()?,
            slot: Mutex::new(Slot::Uninitialized),
            loading_listeners: Arc::new(RwLock::new(self.loading_listeners)),
            subscriptions: Mutex::new(Vec::new()),
        });
        for signal in self.signals {
            cache.invalidate_on(signal)?;
        }
        Ok(cache)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use crate::cache::CacheEntry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    fn recorder() -> (LoadingListener, Arc<Mutex<Vec<bool>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        (Arc::new(move |loading: bool| sink.lock().push(loading)), events)
    }

    async fn next(stream: &mut ValueStream<String>) -> String {
        timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("stream value in time")
            .expect("stream still open")
    }

    #[tokio::test]
    async fn test_first_value_then_update_without_loading_flicker() {
        let (listener, events) = recorder();
        let cache = StreamCache::<String>::builder("profile")
            .loading_listener(listener)
            .build()
            .unwrap();

        let mut stream = cache
            .load_stream("user-1", || Source::value("a".to_string()))
            .unwrap();
        assert_eq!(next(&mut stream).await, "a");

        cache.put("user-1", "b".to_string());
        assert_eq!(next(&mut stream).await, "b");

        assert_eq!(*events.lock(), vec![true, false]);
        assert_eq!(cache.state(), StreamState::Idle);
        assert_eq!(cache.backing().get(STORAGE_KEY), Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_invalidate_reruns_source() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = StreamCache::<String>::builder("feed").build().unwrap();

        let mut stream = cache
            .load_stream("k", move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Source::value(format!("v{}", n))
            })
            .unwrap();
        assert_eq!(next(&mut stream).await, "v0");

        cache.invalidate_all();
        assert_eq!(next(&mut stream).await, "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_same_key_joins_existing_stream() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = StreamCache::<String>::builder("feed").build().unwrap();

        let supplier = {
            let calls = Arc::clone(&calls);
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Source::value("shared".to_string())
            }
        };
        let mut first = cache.load_stream("k", supplier.clone()).unwrap();
        assert_eq!(next(&mut first).await, "shared");

        let mut second = cache.load_stream("k", supplier).unwrap();
        assert_eq!(next(&mut second).await, "shared");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_key_change_switches_source() {
        let cache = StreamCache::<String>::builder("user").build().unwrap();

        let mut stream = cache
            .load_stream("1", || Source::value("first".to_string()))
            .unwrap();
        assert_eq!(next(&mut stream).await, "first");

        let mut switched = cache
            .load_stream("2", || Source::value("second".to_string()))
            .unwrap();
        assert_eq!(next(&mut switched).await, "second");
        assert_eq!(next(&mut stream).await, "second");
    }

    #[tokio::test]
    async fn test_subscriber_joining_mid_refresh_waits_for_new_value() {
        let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
        let gate = Arc::new(Mutex::new(Some(gate_rx)));
        let cache = StreamCache::<String>::builder("slow").build().unwrap();
        cache.backing().put(STORAGE_KEY, "stale".to_string());

        let mut first = cache
            .load_stream("k", move || {
                let gate = gate.lock().take();
                Source::deferred(async move {
                    if let Some(gate) = gate {
                        gate.await?;
                    }
                    Ok::<_, anyhow::Error>("fresh".to_string())
                })
            })
            .unwrap();
        assert_eq!(next(&mut first).await, "stale");

        cache.invalidate_all();
        assert_eq!(cache.state(), StreamState::Loading);
        let mut late = cache
            .load_stream("k", || Source::value("unused".to_string()))
            .unwrap();

        gate_tx.send(()).unwrap();
        assert_eq!(next(&mut late).await, "fresh");
        assert_eq!(next(&mut first).await, "fresh");
    }

    #[tokio::test]
    async fn test_resumes_from_persisted_value() {
        let mut storage = InMemoryStorage::new();
        storage.put(STORAGE_KEY, CacheEntry::new("persisted".to_string(), 0));
        let (listener, events) = recorder();
        let cache = StreamCache::<String>::builder("resume")
            .storage(storage)
            .loading_listener(listener)
            .build()
            .unwrap();

        let mut stream = cache
            .load_stream("k", || Source::value("from source".to_string()))
            .unwrap();

        assert_eq!(next(&mut stream).await, "persisted");
        assert!(events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (listener, events) = recorder();
        let cache = StreamCache::<String>::builder("flaky")
            .loading_listener(listener)
            .build()
            .unwrap();

        let mut stream = cache
            .load_stream("k", move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Source::value("good".to_string())
                } else {
                    Source::deferred(async { Err(anyhow::anyhow!("offline")) })
                }
            })
            .unwrap();
        assert_eq!(next(&mut stream).await, "good");

        cache.invalidate_all();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(cache.state(), StreamState::Idle);
        assert_eq!(cache.current(), Some("good".to_string()));
        assert_eq!(*events.lock(), vec![true, false, true, false]);
    }

    #[tokio::test]
    async fn test_dispose_ends_subscribers_and_rejects_requests() {
        let cache = StreamCache::<String>::builder("short").build().unwrap();
        let mut stream = cache
            .load_stream("k", || Source::value("v".to_string()))
            .unwrap();
        assert_eq!(next(&mut stream).await, "v");

        cache.dispose();

        let ended = timeout(Duration::from_secs(1), stream.next()).await.unwrap();
        assert!(ended.is_none());
        assert_eq!(cache.state(), StreamState::Disposed);
        assert!(matches!(
            cache.load_stream("k", || Source::value("v".to_string())),
            Err(CacheError::Disposed(_))
        ));
    }

    #[test]
    fn test_load_outside_runtime_fails() {
        let cache = StreamCache::<String>::builder("no-runtime").build().unwrap();
        let result = cache.load_stream("k", || Source::value("v".to_string()));
        assert!(matches!(result, Err(CacheError::NoRuntime)));
        assert_eq!(cache.state(), StreamState::Uninitialized);
    }
}
