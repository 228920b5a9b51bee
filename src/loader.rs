//! The public facade: [`Loader`] and its builder.

use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::task::Spawn;
use tracing::debug;

use crate::backoff::RetryConfig;
use crate::bus::{invoke, Callback, Subscribers};
use crate::config::LoaderConfig;
use crate::executor::Fetch;
use crate::scheduler::{Queue, Throttle};
use crate::store::{KeyRecord, KeyStore, Origin, Status};
use crate::timer::{DelayTimer, Timer};
use crate::watch::Watch;

/// Lifecycle of a loader. Deferred work (timer fires, fetch results, retry
/// waits) checks this before touching anything.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Active,
    Destroyed,
}

impl Lifecycle {
    #[inline]
    pub(crate) fn is_destroyed(self) -> bool {
        self == Lifecycle::Destroyed
    }
}

pub(crate) struct State<Key, Value> {
    pub(crate) lifecycle: Lifecycle,
    pub(crate) queue: Queue<Key>,
    pub(crate) store: KeyStore<Key, Value>,
    pub(crate) subscribers: Subscribers<Key>,
    pub(crate) throttle: Throttle,
}

/// Everything a loader owns. Handles hold it strongly; deferred tasks hold
/// it weakly, so dropping every [`Loader`] handle leaves them inert.
pub(crate) struct Shared<Key, Value> {
    pub(crate) state: Mutex<State<Key, Value>>,
    pub(crate) fetch: ArcSwap<Box<dyn Fetch<Key, Value>>>,
    pub(crate) retry: ArcSwap<RetryConfig>,
    pub(crate) timer: Arc<dyn Timer>,
    pub(crate) spawner: Arc<dyn Spawn + Send + Sync>,
}

impl<Key, Value> Shared<Key, Value>
where
    Key: Clone + Eq + Hash + Send + Sync + 'static,
    Value: Clone + Send + Sync + 'static,
{
    // Callbacks never run under this lock, and panics from them are caught,
    // so a poisoned lock still holds consistent state.
    pub(crate) fn lock(&self) -> MutexGuard<'_, State<Key, Value>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invoke the subscribers of `keys`, one key at a time. Each callback is
    /// checked against the live registry just before it runs, so destroying
    /// the loader or unsubscribing from inside a callback takes effect for
    /// every callback after it.
    pub(crate) fn notify<'a>(&self, keys: impl IntoIterator<Item = &'a Key>) {
        for key in keys {
            let listeners = {
                let state = self.lock();
                if state.lifecycle.is_destroyed() {
                    return;
                }
                state.subscribers.listeners(Some(key))
            };

            for callback in &listeners {
                {
                    let state = self.lock();
                    if state.lifecycle.is_destroyed() {
                        return;
                    }
                    if !state.subscribers.is_registered(key, callback) {
                        continue;
                    }
                }

                invoke(callback);
            }
        }
    }
}

/// A snapshot of a set of keys, read under a single lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<Value> {
    pub status: Status,
    pub data: Vec<Option<Value>>,
}

/// A keyed loader. Callers request keys; requests made within one throttle
/// window are coalesced into a single call to the fetch function, results
/// are cached per key, failed batches are retried with backoff, and
/// subscribers of a key are notified whenever its resolution state changes.
///
/// A `Loader` is a cheap handle: clones share the same state.
pub struct Loader<Key, Value> {
    pub(crate) shared: Arc<Shared<Key, Value>>,
}

impl<Key, Value> Clone for Loader<Key, Value> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<Key, Value> Loader<Key, Value>
where
    Key: Clone + Eq + Hash + Send + Sync + 'static,
    Value: Clone + Send + Sync + 'static,
{
    /// Create a loader with the default configuration: a throttle window of
    /// zero, exponential retries up to 25 attempts, and [`DelayTimer`].
    pub fn new(fetch: impl Fetch<Key, Value>, spawner: impl Spawn + Send + Sync + 'static) -> Self {
        Self::builder(fetch, spawner).build()
    }

    pub fn builder(
        fetch: impl Fetch<Key, Value>,
        spawner: impl Spawn + Send + Sync + 'static,
    ) -> LoaderBuilder<Key, Value> {
        let fetch: Box<dyn Fetch<Key, Value>> = Box::new(fetch);

        LoaderBuilder {
            fetch,
            spawner: Arc::new(spawner),
            timer: Arc::new(DelayTimer),
            config: LoaderConfig::default(),
        }
    }

    /// Request `keys`. Keys that are neither complete, in flight, nor
    /// already queued join the queue, and the throttle window opens if it
    /// isn't open already. Errored keys are retried; their subscribers are
    /// notified once, while the key still reads as errored, before the key
    /// goes back to loading.
    ///
    /// Does nothing once the loader is destroyed.
    pub fn request_data(&self, keys: &[Key]) {
        self.shared.enqueue(keys.iter().cloned(), Origin::Caller);
    }

    /// The data of each key, aligned with `keys`. `None` where no successful
    /// fetch has been applied.
    pub fn get_data(&self, keys: &[Key]) -> Vec<Option<Value>> {
        self.shared.lock().store.get(keys)
    }

    /// The aggregate status of `keys`: [`Status::Errored`] if any key is
    /// errored, otherwise [`Status::Loading`] if any key is not complete,
    /// otherwise [`Status::Complete`].
    pub fn get_status(&self, keys: &[Key]) -> Status {
        self.shared.lock().store.status(keys)
    }

    /// Status and data of `keys` from one consistent view.
    pub fn snapshot(&self, keys: &[Key]) -> Snapshot<Value> {
        let state = self.shared.lock();

        Snapshot {
            status: state.store.status(keys),
            data: state.store.get(keys),
        }
    }

    /// A copy of the resolution record of `key`, if it was ever requested.
    pub fn record(&self, key: &Key) -> Option<KeyRecord<Value>> {
        self.shared.lock().store.record(key).cloned()
    }

    /// Number of keys waiting for the next batch.
    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Register `callback` to run whenever `key` changes. Registering the
    /// same callback twice registers it twice.
    pub fn subscribe(&self, key: Key, callback: Callback) {
        let mut state = self.shared.lock();
        if !state.lifecycle.is_destroyed() {
            state.subscribers.subscribe(key, callback);
        }
    }

    /// Remove the first registration of `callback` under `key`. Returns
    /// false (and does nothing) if there is none.
    pub fn unsubscribe(&self, key: &Key, callback: &Callback) -> bool {
        self.shared.lock().subscribers.unsubscribe(key, callback)
    }

    /// Request `keys` and keep `callback` subscribed to all of them until
    /// the returned [`Watch`] is dropped.
    pub fn watch(
        &self,
        keys: &[Key],
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Watch<Key, Value> {
        Watch::new(self.clone(), keys.to_vec(), Arc::new(callback))
    }

    /// Stop the loader. Afterwards nothing is fetched, mutated or notified;
    /// pending timers and in-flight fetches finish without effect, and
    /// further calls are silently ignored.
    pub fn destroy(&self) {
        let mut state = self.shared.lock();
        if state.lifecycle.is_destroyed() {
            return;
        }

        state.lifecycle = Lifecycle::Destroyed;
        state.subscribers.clear();
        debug!(queued = state.queue.len(), "loader destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.lock().lifecycle.is_destroyed()
    }

    /// Replace the fetch function. Batches already in flight finish with
    /// the function they were dispatched with.
    pub fn set_fetch(&self, fetch: impl Fetch<Key, Value>) {
        let fetch: Box<dyn Fetch<Key, Value>> = Box::new(fetch);
        self.shared.fetch.store(Arc::new(fetch));
    }

    /// Change the throttle window. A pending window is cancelled and, if
    /// anything is queued, a new one opens immediately with the new width.
    pub fn set_throttle(&self, window: Duration) {
        self.shared.reconfigure_throttle(window);
    }

    /// Replace the retry policy. It applies from the next failure on.
    pub fn set_retry(&self, retry: RetryConfig) {
        self.shared.retry.store(Arc::new(retry));
    }

    /// The retry policy currently in effect.
    pub fn retry(&self) -> RetryConfig {
        **self.shared.retry.load()
    }
}

impl<Key, Value> Debug for Loader<Key, Value>
where
    Key: Clone + Eq + Hash + Send + Sync + 'static,
    Value: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();

        f.debug_struct("Loader")
            .field("lifecycle", &state.lifecycle)
            .field("queued", &state.queue.len())
            .field("throttle", &state.throttle.window())
            .field("retry", &**self.shared.retry.load())
            .field("fetch", &"<fetch>")
            .finish()
    }
}

/// Configures a [`Loader`] before it is built.
pub struct LoaderBuilder<Key, Value> {
    fetch: Box<dyn Fetch<Key, Value>>,
    spawner: Arc<dyn Spawn + Send + Sync>,
    timer: Arc<dyn Timer>,
    config: LoaderConfig,
}

impl<Key, Value> LoaderBuilder<Key, Value>
where
    Key: Clone + Eq + Hash + Send + Sync + 'static,
    Value: Clone + Send + Sync + 'static,
{
    /// Use `timer` for throttle windows and retry waits.
    pub fn timer(mut self, timer: impl Timer) -> Self {
        self.timer = Arc::new(timer);
        self
    }

    /// Apply a whole configuration, replacing earlier `throttle` and
    /// `retry` calls.
    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn throttle(mut self, window: Duration) -> Self {
        self.config.throttle = window;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn build(self) -> Loader<Key, Value> {
        let LoaderBuilder {
            fetch,
            spawner,
            timer,
            config,
        } = self;

        let state = State {
            lifecycle: Lifecycle::Active,
            queue: Queue::default(),
            store: KeyStore::default(),
            subscribers: Subscribers::default(),
            throttle: Throttle::new(config.throttle),
        };

        Loader {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                fetch: ArcSwap::from_pointee(fetch),
                retry: ArcSwap::from_pointee(config.retry),
                timer,
                spawner,
            }),
        }
    }
}
