//! Error types produced by the loader.
//!
//! - [`FetchError`] is the failure of one batch fetch. It never escapes the
//!   loader; it is recorded on every key of the failed batch and drives the
//!   retry policy.
//! - [`ConfigError`] is raised while building a retry configuration from
//!   untrusted input (for instance, a deserialized config file).

use std::any::Any;
use std::error::Error as StdError;

use thiserror::Error;

/// A boxed error, as returned by most fetch collaborators.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The failure of a single batch fetch.
///
/// Both shapes of failure a fetch function can produce (returning an error,
/// or panicking while it is called or polled) end up here, so the loader only
/// has one failure path.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FetchError {
    /// The fetch function reported an error.
    #[error("fetch failed: {0}")]
    Failed(#[source] BoxError),

    /// The fetch function panicked. The panic payload is kept if it was a
    /// string.
    #[error("fetch panicked: {0}")]
    Panicked(String),
}

impl FetchError {
    /// Wrap any error (or error message) as a fetch failure.
    ///
    /// ```
    /// use keyloader::FetchError;
    ///
    /// let err = FetchError::new("upstream unavailable");
    /// assert_eq!(err.to_string(), "fetch failed: upstream unavailable");
    /// ```
    pub fn new(error: impl Into<BoxError>) -> Self {
        FetchError::Failed(error.into())
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            FetchError::Failed(..) => "fetch_failed",
            FetchError::Panicked(..) => "fetch_panicked",
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_owned(),
                Err(..) => "<non-string panic payload>".to_owned(),
            },
        };

        FetchError::Panicked(message)
    }
}

/// Invalid loader configuration.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A fixed retry delay must be at least one millisecond.
    #[error("fixed retry delay must be positive")]
    ZeroDelay,

    /// A named retry delay other than `"exponential"`.
    #[error("unknown retry delay {0:?}; expected \"exponential\" or a number of milliseconds")]
    UnknownDelay(String),
}
