//! The queue of keys awaiting the next batch, and the throttle window that
//! decides when that batch goes out.
//!
//! The window is trailing-edge only and does not reset: the first request
//! into an empty, unarmed scheduler opens a window of the configured width,
//! requests arriving while it is open simply join the queue, and when it
//! closes the whole queue is flushed as one batch. A zero width skips the
//! timer and flushes on the next executor turn.

use std::hash::Hash;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{AbortHandle, Abortable, FutureExt};
use futures::task::SpawnExt;
use indexmap::IndexSet;
use tracing::{error, trace};

use crate::batch::Batch;
use crate::loader::{Shared, State};
use crate::store::{Admission, Origin};

/// Keys awaiting the next batch: insertion-ordered and deduplicated.
#[derive(Debug)]
pub(crate) struct Queue<Key> {
    keys: IndexSet<Key>,
}

impl<Key> Default for Queue<Key> {
    fn default() -> Self {
        Self {
            keys: IndexSet::new(),
        }
    }
}

impl<Key: Eq + Hash> Queue<Key> {
    #[inline]
    pub(crate) fn contains(&self, key: &Key) -> bool {
        self.keys.contains(key)
    }

    /// Returns false if the key was already queued.
    #[inline]
    pub(crate) fn push(&mut self, key: Key) -> bool {
        self.keys.insert(key)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Take every queued key as a batch, leaving the queue empty.
    pub(crate) fn take(&mut self) -> Batch<Key> {
        Batch::from_unique(mem::take(&mut self.keys).into_iter().collect())
    }
}

#[derive(Debug)]
struct Armed {
    generation: u64,
    abort: AbortHandle,
}

/// The throttle window: its width, and the handle of the timer currently
/// armed, if any. Each arming gets a new generation so that a timer which
/// was cancelled, but fired anyway, can tell it is stale.
#[derive(Debug)]
pub(crate) struct Throttle {
    window: Duration,
    armed: Option<Armed>,
    generation: u64,
}

impl Throttle {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            armed: None,
            generation: 0,
        }
    }

    #[inline]
    pub(crate) fn window(&self) -> Duration {
        self.window
    }

    #[inline]
    pub(crate) fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Record a newly armed timer; returns its generation.
    pub(crate) fn arm(&mut self, abort: AbortHandle) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.armed = Some(Armed {
            generation: self.generation,
            abort,
        });
        self.generation
    }

    /// Disarm if `generation` is the armed timer. Returns false for a stale
    /// timer, which must not flush.
    pub(crate) fn fire(&mut self, generation: u64) -> bool {
        match self.armed {
            Some(ref armed) if armed.generation == generation => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }

    /// Change the width, cancelling the armed timer.
    pub(crate) fn set_window(&mut self, window: Duration) {
        self.window = window;
        if let Some(armed) = self.armed.take() {
            armed.abort.abort();
        }
    }
}

impl<Key, Value> State<Key, Value>
where
    Key: Clone + Eq + Hash,
    Value: Clone,
{
    /// The cache check and the in-window dedup check, combined.
    fn admission(&self, key: &Key) -> Admission {
        if self.queue.contains(key) {
            Admission::Refused
        } else {
            self.store.admission(key)
        }
    }

    fn push_pending(&mut self, key: Key, origin: Origin) {
        self.store.mark_pending(key.clone(), origin);
        self.queue.push(key);
    }
}

impl<Key, Value> Shared<Key, Value>
where
    Key: Clone + Eq + Hash + Send + Sync + 'static,
    Value: Clone + Send + Sync + 'static,
{
    /// Queue every admissible key, then arm the throttle.
    pub(crate) fn enqueue(self: &Arc<Self>, keys: impl IntoIterator<Item = Key>, origin: Origin) {
        for key in keys {
            {
                let mut state = self.lock();
                if state.lifecycle.is_destroyed() {
                    return;
                }

                match state.admission(&key) {
                    Admission::Refused => continue,
                    Admission::Fresh => {
                        state.push_pending(key, origin);
                        continue;
                    }
                    Admission::Stale => {}
                }
            }

            // Subscribers see the errored record one last time before it
            // flips back to pending.
            self.notify(Some(&key));

            // A subscriber may have re-entered and queued it already.
            let mut state = self.lock();
            if state.lifecycle.is_destroyed() {
                return;
            }
            if state.admission(&key) == Admission::Stale {
                trace!(?origin, "re-queueing errored key");
                state.push_pending(key, origin);
            }
        }

        self.arm_throttle();
    }

    /// Open a throttle window, unless one is open or nothing is queued.
    pub(crate) fn arm_throttle(self: &Arc<Self>) {
        let (generation, window, registration) = {
            let mut state = self.lock();
            if state.lifecycle.is_destroyed() || state.queue.is_empty() || state.throttle.is_armed()
            {
                return;
            }

            let (abort, registration) = AbortHandle::new_pair();
            let generation = state.throttle.arm(abort);
            (generation, state.throttle.window(), registration)
        };

        let sleep = if window.is_zero() {
            None
        } else {
            Some(self.timer.sleep(window))
        };

        let weak = Arc::downgrade(self);
        let fire = async move {
            if let Some(sleep) = sleep {
                sleep.await;
            }
            Shared::flush(weak, generation).await;
        };

        trace!(generation, ?window, "throttle armed");

        if let Err(err) = self
            .spawner
            .spawn(Abortable::new(fire, registration).map(|_| ()))
        {
            error!(%err, "failed to spawn throttle timer");
            self.lock().throttle.fire(generation);
        }
    }

    /// Cancel the open window, if any, and re-arm with the new width.
    pub(crate) fn reconfigure_throttle(self: &Arc<Self>, window: Duration) {
        {
            let mut state = self.lock();
            if state.lifecycle.is_destroyed() {
                return;
            }
            state.throttle.set_window(window);
        }

        self.arm_throttle();
    }
}
