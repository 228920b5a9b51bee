//! Scheduling automatic retries of failed batches.
//!
//! A failed batch retries as a unit; its most-attempted key decides both
//! whether it retries at all and how long it waits. Once the budget in the
//! current [`RetryConfig`](crate::RetryConfig) is spent the batch stays
//! errored until a caller requests its keys again.

use std::hash::Hash;
use std::sync::Arc;

use futures::task::SpawnExt;
use tracing::{debug, error, trace, warn};

use crate::batch::Batch;
use crate::loader::Shared;
use crate::store::Origin;

impl<Key, Value> Shared<Key, Value>
where
    Key: Clone + Eq + Hash + Send + Sync + 'static,
    Value: Clone + Send + Sync + 'static,
{
    pub(crate) fn schedule_retry(self: &Arc<Self>, batch: Batch<Key>) {
        let attempts = {
            let state = self.lock();
            if state.lifecycle.is_destroyed() {
                return;
            }
            state.store.max_attempts(&batch)
        };

        let retry = **self.retry.load();
        if !retry.allows(attempts) {
            warn!(
                keys = batch.len(),
                attempts,
                max = retry.max.get(),
                "retry budget exhausted"
            );
            return;
        }

        let wait = retry.delay_for(attempts);
        debug!(keys = batch.len(), attempts, ?wait, "scheduling retry");

        // The wait is never cancelled; a loader destroyed or dropped in the
        // meantime makes it a no-op.
        let sleep = self.timer.sleep(wait);
        let weak = Arc::downgrade(self);
        let resume = async move {
            sleep.await;
            match weak.upgrade() {
                Some(shared) => shared.enqueue(batch, Origin::Retry),
                None => trace!("loader dropped during retry backoff"),
            }
        };

        if let Err(err) = self.spawner.spawn(resume) {
            error!(%err, "failed to spawn retry");
        }
    }
}
