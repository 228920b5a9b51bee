//! The wait primitive behind the throttle window and the retry backoff.
//!
//! The loader never sleeps on its own; every wait goes through a [`Timer`],
//! so tests can substitute a manual clock (or one that completes
//! immediately) and step through throttle windows and backoffs
//! deterministically.

use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use futures_timer::Delay;

/// A source of sleeps.
pub trait Timer: Send + Sync + 'static {
    /// Returns a future that completes once `duration` has elapsed.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// The default [`Timer`], backed by [`futures_timer::Delay`]. It works with
/// any executor.
#[derive(Debug, Default, Clone, Copy)]
pub struct DelayTimer;

impl Timer for DelayTimer {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Delay::new(duration).boxed()
    }
}

impl<T: Timer + ?Sized> Timer for std::sync::Arc<T> {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        (**self).sleep(duration)
    }
}
