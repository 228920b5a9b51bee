//! A deterministic executor and clock for stepping a loader through its
//! throttle windows, fetches and retry waits.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use cooked_waker::{IntoWaker, WakeRef};
use futures::future::{BoxFuture, FutureExt};
use futures::task::{FutureObj, Spawn, SpawnError};
use keyloader::{Batch, FetchResult, Loader, LoaderBuilder, Timer};

/// A waker that stores true if it has been awoken
#[derive(Debug, Clone, Default)]
struct FlagWaker {
    cell: Arc<AtomicBool>,
}

impl FlagWaker {
    fn signaled() -> Self {
        let waker = FlagWaker::default();
        waker.cell.store(true, Ordering::SeqCst);
        waker
    }

    fn take(&self) -> bool {
        self.cell.swap(false, Ordering::SeqCst)
    }
}

impl WakeRef for FlagWaker {
    fn wake_by_ref(&self) {
        self.cell.store(true, Ordering::SeqCst)
    }
}

struct Task {
    fut: FutureObj<'static, ()>,
    signal: FlagWaker,
    waker: Waker,
}

impl Task {
    fn new(fut: FutureObj<'static, ()>) -> Self {
        let signal = FlagWaker::signaled();

        Task {
            fut,
            waker: Arc::new(signal.clone()).into_waker(),
            signal,
        }
    }

    /// Poll if woken since the last poll. Returns None if not woken.
    fn poll_if_woken(&mut self) -> Option<Poll<()>> {
        if !self.signal.take() {
            return None;
        }

        Some(self.fut.poll_unpin(&mut Context::from_waker(&self.waker)))
    }
}

/// Runs spawned tasks only when asked to, on the calling thread.
#[derive(Clone, Default)]
pub struct Executor {
    incoming: Arc<Mutex<Vec<FutureObj<'static, ()>>>>,
    parked: Arc<Mutex<Vec<Task>>>,
}

impl Spawn for Executor {
    fn spawn_obj(&self, future: FutureObj<'static, ()>) -> Result<(), SpawnError> {
        self.incoming.lock().unwrap().push(future);
        Ok(())
    }
}

impl Executor {
    /// Poll woken tasks until none are left to poll.
    pub fn run_until_stalled(&self) {
        let mut tasks = mem::take(&mut *self.parked.lock().unwrap());

        loop {
            let incoming = mem::take(&mut *self.incoming.lock().unwrap());
            tasks.extend(incoming.into_iter().map(Task::new));

            let mut progressed = false;
            tasks.retain_mut(|task| match task.poll_if_woken() {
                None => true,
                Some(poll) => {
                    progressed = true;
                    poll.is_pending()
                }
            });

            if !progressed {
                break;
            }
        }

        *self.parked.lock().unwrap() = tasks;
    }

    /// Tasks spawned and not yet finished.
    pub fn pending(&self) -> usize {
        self.parked.lock().unwrap().len() + self.incoming.lock().unwrap().len()
    }
}

#[derive(Default)]
struct ClockState {
    now: Duration,
    sleepers: Vec<(Duration, Waker)>,
    requested: Vec<Duration>,
}

/// A clock that only moves when told to.
#[derive(Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ClockState>>,
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        let due: Vec<Waker> = {
            let mut state = self.state.lock().unwrap();
            state.now = state.now.saturating_add(by);
            let now = state.now;

            let (due, waiting) = mem::take(&mut state.sleepers)
                .into_iter()
                .partition(|(deadline, _)| *deadline <= now);
            state.sleepers = waiting;
            due.into_iter().map(|(_, waker)| waker).collect()
        };

        due.into_iter().for_each(Waker::wake);
    }

    /// Every sleep requested so far, in order.
    pub fn requested(&self) -> Vec<Duration> {
        self.state.lock().unwrap().requested.clone()
    }
}

struct Sleep {
    state: Arc<Mutex<ClockState>>,
    deadline: Duration,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.state.lock().unwrap();

        if state.now >= self.deadline {
            Poll::Ready(())
        } else {
            state.sleepers.push((self.deadline, ctx.waker().clone()));
            Poll::Pending
        }
    }
}

impl Timer for ManualClock {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let mut state = self.state.lock().unwrap();
        state.requested.push(duration);

        Sleep {
            state: Arc::clone(&self.state),
            deadline: state.now.saturating_add(duration),
        }
        .boxed()
    }
}

/// An executor and a clock, stepped together.
#[derive(Clone, Default)]
pub struct Harness {
    pub executor: Executor,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    /// A loader builder wired to this harness.
    pub fn builder<F>(&self, fetch: F) -> LoaderBuilder<u32, String>
    where
        F: keyloader::Fetch<u32, String>,
    {
        Loader::builder(fetch, self.executor.clone()).timer(self.clock.clone())
    }

    /// Run everything that can run without time passing.
    pub fn settle(&self) {
        self.executor.run_until_stalled();
    }

    pub fn advance(&self, millis: u64) {
        self.clock.advance(Duration::from_millis(millis));
        self.settle();
    }
}

/// Every batch a fetch function was called with.
#[derive(Clone, Default)]
pub struct Calls {
    batches: Arc<Mutex<Vec<Vec<u32>>>>,
}

impl Calls {
    pub fn record(&self, batch: &Batch<u32>) {
        self.batches.lock().unwrap().push(batch.keys().to_vec());
    }

    pub fn count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn batches(&self) -> Vec<Vec<u32>> {
        self.batches.lock().unwrap().clone()
    }
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

pub fn names(batch: &Batch<u32>) -> HashMap<u32, String> {
    batch.clone().into_values(|key| format!("v{}", key))
}

/// Resolves every key to `v{key}` immediately.
pub fn succeed(calls: &Calls) -> impl keyloader::Fetch<u32, String> {
    let calls = calls.clone();

    move |batch: Batch<u32>| {
        calls.record(&batch);
        let result: FetchResult<u32, String> = Ok(names(&batch));
        futures::future::ready(result)
    }
}

/// Resolves every key to `v{key}` after `delay` of clock time.
pub fn succeed_after(calls: &Calls, clock: &ManualClock, delay: Duration) -> impl keyloader::Fetch<u32, String> {
    let calls = calls.clone();
    let clock = clock.clone();

    move |batch: Batch<u32>| {
        calls.record(&batch);
        let sleep = clock.sleep(delay);
        async move {
            sleep.await;
            let result: FetchResult<u32, String> = Ok(names(&batch));
            result
        }
    }
}

/// Always fails.
pub fn fail(calls: &Calls) -> impl keyloader::Fetch<u32, String> {
    let calls = calls.clone();

    move |batch: Batch<u32>| {
        calls.record(&batch);
        let result: FetchResult<u32, String> = Err(keyloader::FetchError::new(":("));
        futures::future::ready(result)
    }
}

/// A callback that counts its calls.
pub fn counter() -> (keyloader::Callback, Arc<std::sync::atomic::AtomicUsize>) {
    let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let handle = Arc::clone(&count);
    let callback = keyloader::callback(move || {
        handle.fetch_add(1, Ordering::SeqCst);
    });

    (callback, count)
}
