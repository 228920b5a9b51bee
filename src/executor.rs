//! Drives one batch through the fetch function and applies the outcome.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use futures::future::{self, BoxFuture, FutureExt};
use tracing::{debug, trace, warn};

use crate::batch::Batch;
use crate::error::FetchError;
use crate::loader::Shared;

/// What a fetch function resolves to: a value for each key it found.
pub type FetchResult<Key, Value> = Result<HashMap<Key, Value>, FetchError>;

/// The batched retrieval behind a loader.
///
/// A fetch function receives every key of one batch and returns a map from
/// key to value. Keys missing from the map are treated as resolved with no
/// data. Failing, by returning an error or by panicking, fails every key of
/// the batch.
///
/// Any `Fn(Batch<Key>) -> impl Future<Output = FetchResult<Key, Value>>` is
/// a `Fetch`:
///
/// ```
/// use keyloader::{Batch, Fetch, FetchError, FetchResult};
///
/// fn assert_fetch<F: Fetch<u32, String>>(_: F) {}
///
/// assert_fetch(|batch: Batch<u32>| async move {
///     let users: FetchResult<u32, String> = Ok(batch.into_values(|id| format!("user-{}", id)));
///     users
/// });
///
/// assert_fetch(|_batch: Batch<u32>| async move {
///     Err::<_, FetchError>(FetchError::new("offline"))
/// });
/// ```
pub trait Fetch<Key, Value>: Send + Sync + 'static {
    fn fetch(&self, batch: Batch<Key>) -> BoxFuture<'static, FetchResult<Key, Value>>;
}

impl<Key, Value, F, Fut> Fetch<Key, Value> for F
where
    Key: 'static,
    Value: 'static,
    F: Fn(Batch<Key>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult<Key, Value>> + Send + 'static,
{
    fn fetch(&self, batch: Batch<Key>) -> BoxFuture<'static, FetchResult<Key, Value>> {
        (self)(batch).boxed()
    }
}

/// Call `fetch`, folding a panic in the call itself or while its future is
/// polled into a [`FetchError`].
fn call<Key, Value>(
    fetch: &dyn Fetch<Key, Value>,
    batch: Batch<Key>,
) -> BoxFuture<'static, FetchResult<Key, Value>>
where
    Key: Send + 'static,
    Value: Send + 'static,
{
    match panic::catch_unwind(AssertUnwindSafe(|| fetch.fetch(batch))) {
        Ok(fut) => AssertUnwindSafe(fut)
            .catch_unwind()
            .map(|outcome| match outcome {
                Ok(result) => result,
                Err(payload) => Err(FetchError::from_panic(payload)),
            })
            .boxed(),
        Err(payload) => future::ready(Err(FetchError::from_panic(payload))).boxed(),
    }
}

impl<Key, Value> Shared<Key, Value>
where
    Key: Clone + Eq + Hash + Send + Sync + 'static,
    Value: Clone + Send + Sync + 'static,
{
    /// Flush the queue, if `generation` is still the armed throttle timer.
    ///
    /// Only a weak reference is held while the fetch is in flight, so a
    /// loader whose handles are all dropped isn't kept alive by its batches.
    pub(crate) async fn flush(weak: Weak<Self>, generation: u64) {
        let (batch, fetch) = match weak.upgrade() {
            Some(shared) => match shared.take_batch(generation) {
                Some(taken) => taken,
                None => return,
            },
            None => return,
        };

        debug!(keys = batch.len(), "dispatching batch");
        let pending = call(&**fetch, batch.clone());
        drop(fetch);
        let outcome = pending.await;

        match weak.upgrade() {
            Some(shared) => shared.settle(batch, outcome),
            None => trace!(keys = batch.len(), "loader dropped while batch was in flight"),
        }
    }

    /// Disarm the throttle and take the whole queue, along with the fetch
    /// function in effect right now.
    fn take_batch(&self, generation: u64) -> Option<(Batch<Key>, Arc<Box<dyn Fetch<Key, Value>>>)> {
        let mut state = self.lock();

        if state.lifecycle.is_destroyed() {
            trace!("throttle fired on a destroyed loader");
            return None;
        }

        if !state.throttle.fire(generation) {
            trace!(generation, "stale throttle timer");
            return None;
        }

        let batch = state.queue.take();
        if batch.is_empty() {
            return None;
        }

        Some((batch, self.fetch.load_full()))
    }

    /// Apply a fetch outcome to every key of the batch, then notify. No
    /// subscriber runs until every record has been updated.
    fn settle(self: &Arc<Self>, batch: Batch<Key>, outcome: FetchResult<Key, Value>) {
        let failure = {
            let mut state = self.lock();

            if state.lifecycle.is_destroyed() {
                trace!(keys = batch.len(), "discarding batch outcome for destroyed loader");
                return;
            }

            match outcome {
                Ok(values) => {
                    state.store.apply_success(&batch, values);
                    None
                }
                Err(error) => {
                    let error = Arc::new(error);
                    state.store.apply_failure(&batch, &error);
                    Some(error)
                }
            }
        };

        self.notify(&batch);

        match failure {
            None => debug!(keys = batch.len(), "batch complete"),
            Some(error) => {
                warn!(
                    keys = batch.len(),
                    label = error.as_label(),
                    %error,
                    "batch failed"
                );
                self.schedule_retry(batch);
            }
        }
    }
}
