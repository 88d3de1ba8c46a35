//! Background task processing refresh and update requests of a stream cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, OptionFuture};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::cache::{Cache, LoadingListener};
use crate::error::{CacheError, Result};
use crate::stream::{Snapshot, StreamRequest, StreamSupplier, STORAGE_KEY};

pub(crate) struct StreamDriver<E> {
    pub(crate) name: String,
    pub(crate) supplier: Arc<Mutex<StreamSupplier<E>>>,
    pub(crate) backing: Arc<Cache<E>>,
    pub(crate) values: Arc<watch::Sender<Snapshot<E>>>,
    pub(crate) loading_listeners: Arc<RwLock<Vec<LoadingListener>>>,
    /// Refresh requests sent so far, counted before each send
    pub(crate) refreshes_requested: Arc<AtomicU64>,
    /// Refresh requests received by this driver
    pub(crate) refreshes_seen: u64,
}

impl<E> StreamDriver<E>
where
    E: Clone + Send + Sync + 'static,
{
    // == Run ==
    /// Processes requests until the request channel closes.
    ///
    /// At most one refresh runs at a time. Any new request supersedes a
    /// running refresh, whose result is then discarded.
    pub(crate) async fn run(mut self, mut requests: mpsc::UnboundedReceiver<StreamRequest<E>>) {
        let mut refresh: Option<BoxFuture<'static, Result<E>>> = None;

        loop {
            tokio::select! {
                biased;

                request = requests.recv() => {
                    let Some(request) = request else {
                        break;
                    };
                    if refresh.take().is_some() {
                        debug!(cache = %self.name, "stream refresh superseded");
                        self.notify_loading(false);
                    }
                    match request {
                        StreamRequest::Refresh => {
                            self.refreshes_seen += 1;
                            refresh = Some(self.begin_refresh());
                        }
                        StreamRequest::Update(value) => self.publish(value),
                    }
                }
                Some(result) = OptionFuture::from(refresh.as_mut()), if refresh.is_some() => {
                    refresh = None;
                    match result {
                        Ok(value) => self.publish(value),
                        Err(err) => self.fail(&err),
                    }
                    self.notify_loading(false);
                }
            }
        }

        debug!(cache = %self.name, "stream driver stopped");
    }

    fn begin_refresh(&self) -> BoxFuture<'static, Result<E>> {
        let supplier = Arc::clone(&*self.supplier.lock());
        self.values.send_modify(|snapshot| snapshot.loading = true);
        self.notify_loading(true);
        debug!(cache = %self.name, "stream REFRESH");
        supplier().into_future()
    }

    /// Persists `value` and hands it to every subscriber.
    ///
    /// While a refresh is queued but not yet received, the value is stored
    /// but stays hidden from new subscribers.
    fn publish(&self, value: E) {
        self.backing.put(STORAGE_KEY, value.clone());
        self.values.send_modify(|snapshot| {
            snapshot.value = Some(value);
            snapshot.loading = self.refresh_queued();
            snapshot.version += 1;
        });
        debug!(cache = %self.name, "stream PUBLISH");
    }

    fn fail(&self, err: &CacheError) {
        warn!(cache = %self.name, "Stream source failed, keeping previous value: {}", err);
        self.values
            .send_modify(|snapshot| snapshot.loading = self.refresh_queued());
    }

    // Read inside `send_modify` so it is ordered with the requester's own update
    fn refresh_queued(&self) -> bool {
        self.refreshes_requested.load(Ordering::SeqCst) > self.refreshes_seen
    }

    fn notify_loading(&self, loading: bool) {
        let listeners = self.loading_listeners.read().clone();
        for listener in listeners {
            listener(loading);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;

    fn driver(requested: u64, seen: u64) -> (StreamDriver<String>, watch::Receiver<Snapshot<String>>) {
        let (values, receiver) = watch::channel(Snapshot {
            value: Some("before".to_string()),
            loading: true,
            version: 1,
        });
        let supplier: StreamSupplier<String> = Arc::new(|| Source::value("fresh".to_string()));
        let driver = StreamDriver {
            name: "status".to_string(),
            supplier: Arc::new(Mutex::new(supplier)),
            backing: Cache::builder("status").build().unwrap(),
            values: Arc::new(values),
            loading_listeners: Arc::new(RwLock::new(Vec::new())),
            refreshes_requested: Arc::new(AtomicU64::new(requested)),
            refreshes_seen: seen,
        };
        (driver, receiver)
    }

    #[test]
    fn test_publish_releases_value_when_nothing_queued() {
        let (driver, receiver) = driver(1, 1);

        driver.publish("after".to_string());

        let snapshot = receiver.borrow().clone();
        assert_eq!(snapshot.value, Some("after".to_string()));
        assert!(!snapshot.loading);
        assert_eq!(snapshot.version, 2);
        assert_eq!(driver.backing.get(STORAGE_KEY), Some("after".to_string()));
    }

    #[test]
    fn test_publish_keeps_value_hidden_while_refresh_queued() {
        // A refresh was requested after the running one started
        let (driver, receiver) = driver(2, 1);

        driver.publish("stale".to_string());
        assert!(receiver.borrow().loading);

        driver.fail(&CacheError::EmptySource);
        assert!(receiver.borrow().loading);
    }

    #[tokio::test]
    async fn test_queued_refresh_is_driven_to_completion() {
        let (driver, mut receiver) = driver(2, 1);
        let requested = Arc::clone(&driver.refreshes_requested);
        let (requests, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(driver.run(rx));

        requests.send(StreamRequest::Refresh).unwrap();
        let snapshot = receiver
            .wait_for(|snapshot| !snapshot.loading)
            .await
            .unwrap()
            .clone();

        assert_eq!(snapshot.value, Some("fresh".to_string()));
        assert_eq!(requested.load(Ordering::SeqCst), 2);
        drop(requests);
        task.await.unwrap();
    }
}
