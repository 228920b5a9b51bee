//! Keyloader is a keyed, caching request coalescer in the spirit of the
//! [dataloader pattern](https://github.com/graphql/dataloader). Many
//! independent callers ask for data by key; requests that overlap within a
//! short window are merged into a single batched fetch, results are cached
//! per key, failed batches are retried with backoff, and anyone interested
//! in a key is told exactly when its resolution state changes.
//!
//! ## Overview
//!
//! Suppose you have an API that can look up many users at once, and many
//! parts of your application that each want a handful of users. Rather than
//! having each of them call the API, they share a [`Loader`].
//!
//! First, adapt your batch call to the [`Fetch`] interface. A fetch function
//! takes a [`Batch`] of unique keys, in the order they were first requested,
//! and resolves to a map from key to value:
//!
//! ```
//! use keyloader::{Batch, FetchError, FetchResult};
//!
//! #[derive(Debug, Clone)]
//! struct User {
//!     id: u32,
//!     name: String,
//! }
//!
//! async fn get_users(ids: &[u32]) -> Result<Vec<User>, std::io::Error> {
//!     Ok(ids.iter().map(|&id| User { id, name: format!("user {}", id) }).collect())
//! }
//!
//! async fn fetch_users(batch: Batch<u32>) -> FetchResult<u32, User> {
//!     let users = get_users(batch.keys()).await.map_err(FetchError::new)?;
//!     Ok(users.into_iter().map(|user| (user.id, user)).collect())
//! }
//! ```
//!
//! Keys missing from the returned map resolve with no data. Returning an
//! error, or panicking, fails every key in the batch.
//!
//! Then create a [`Loader`]. A loader doesn't run anything by itself; it
//! needs a [`Spawn`](futures::task::Spawn) implementation to run its timers
//! and fetches on, so it works with any executor:
//!
//! ```no_run
//! # use keyloader::{Batch, FetchResult};
//! # #[derive(Debug, Clone)] struct User { id: u32 }
//! # async fn fetch_users(batch: Batch<u32>) -> FetchResult<u32, User> {
//! #     Ok(batch.into_values(|&id| User { id }))
//! # }
//! use std::time::Duration;
//! use futures::executor::ThreadPool;
//! use keyloader::{Loader, RetryConfig, Status};
//!
//! let pool = ThreadPool::new().expect("failed to build thread pool");
//!
//! let loader = Loader::builder(fetch_users, pool)
//!     .throttle(Duration::from_millis(5))
//!     .retry(RetryConfig::default())
//!     .build();
//!
//! // Three callers, one fetch: [1, 2, 3]
//! loader.request_data(&[1, 2]);
//! loader.request_data(&[2, 3]);
//! loader.request_data(&[3]);
//!
//! assert_eq!(loader.get_status(&[1, 2, 3]), Status::Loading);
//! ```
//!
//! Reading is always synchronous. [`Loader::get_data`] returns whatever has
//! been fetched so far, aligned with the requested keys, and
//! [`Loader::get_status`] summarizes a set of keys as [`Status::Errored`] if
//! any key failed, otherwise [`Status::Loading`] if any key is outstanding,
//! otherwise [`Status::Complete`].
//!
//! To learn when to read again, subscribe to keys. Callbacks run
//! synchronously, right after the change is applied, and never while the
//! loader's lock is held, so they may call back into the loader:
//!
//! ```no_run
//! # use keyloader::{Batch, FetchResult, Loader};
//! # async fn fetch(batch: Batch<u32>) -> FetchResult<u32, u32> { Ok(batch.into_values(|&k| k)) }
//! # let loader = Loader::new(fetch, futures::executor::ThreadPool::new().unwrap());
//! let watch = loader.watch(&[1, 2, 3], || println!("users changed"));
//!
//! // ... later, from the callback or anywhere else:
//! let snapshot = watch.snapshot();
//! println!("{} {:?}", snapshot.status, snapshot.data);
//!
//! // Unsubscribes from all three keys.
//! drop(watch);
//! ```
//!
//! ## Design notes
//!
//! ### Throttled batching
//!
//! The first request into an idle loader opens a window of the configured
//! width. Requests arriving while it is open join the queue but do not
//! extend it; when it closes, the entire queue is fetched as one batch. Keys
//! that are complete, in flight, or already queued are not queued again,
//! which is both the cache and the deduplication.
//!
//! ### Retries
//!
//! A failed batch marks all of its keys errored and is retried as a unit,
//! after a wait chosen by the [`RetryConfig`]: either a constant delay or
//! `250ms × 2^(attempts-1)`. Once the most-attempted key reaches
//! [`RetryConfig::max`] attempts, retries stop; requesting the keys again
//! starts over.
//!
//! ### Lifecycle
//!
//! [`Loader::destroy`] stops everything: timers that fire later and fetches
//! that resolve later are ignored, nothing is notified, and new requests
//! are silently dropped. Deferred work only holds a weak reference to the
//! loader, so dropping every handle has the same effect.

mod backoff;
mod batch;
mod bus;
mod config;
mod error;
mod executor;
mod loader;
mod retry;
mod scheduler;
mod store;
mod timer;
mod watch;

pub use backoff::{RetryConfig, RetryDelay, DEFAULT_MAX_ATTEMPTS, EXPONENTIAL_BASE, MAX_RETRY_WAIT};
pub use batch::Batch;
pub use bus::{callback, Callback};
pub use config::LoaderConfig;
pub use error::{BoxError, ConfigError, FetchError};
pub use executor::{Fetch, FetchResult};
pub use loader::{Loader, LoaderBuilder, Snapshot};
pub use store::{KeyRecord, Status};
pub use timer::{DelayTimer, Timer};
pub use watch::Watch;
