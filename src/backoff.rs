//! # Retry policy for failed batches.
//!
//! [`RetryConfig`] decides whether a failed batch is retried, and how long
//! to wait first. It is parameterized by:
//! - [`RetryConfig::delay`] either a constant wait or the exponential curve;
//! - [`RetryConfig::max`] the attempt count at which retries stop.
//!
//! The exponential delay for attempt `n` (1-based) is `250ms × 2^(n-1)`, so
//! the first retry waits 250ms, the second 500ms, the third 1s, and so on.
//! No wait, exponential or fixed, exceeds [`MAX_RETRY_WAIT`].
//!
//! # Example
//! ```rust
//! use std::num::NonZeroU32;
//! use std::time::Duration;
//! use keyloader::{RetryConfig, RetryDelay};
//!
//! let retry = RetryConfig::default();
//! assert_eq!(retry.delay_for(1), Duration::from_millis(250));
//! assert_eq!(retry.delay_for(3), Duration::from_millis(1000));
//!
//! let fixed = RetryConfig {
//!     delay: RetryDelay::fixed(Duration::from_millis(300)).unwrap(),
//!     max: NonZeroU32::new(3).unwrap(),
//! };
//! assert_eq!(fixed.delay_for(2), Duration::from_millis(300));
//! assert!(fixed.allows(2));
//! assert!(!fixed.allows(3));
//! ```

use std::fmt::{self, Display, Formatter};
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The wait before the first exponential retry.
pub const EXPONENTIAL_BASE: Duration = Duration::from_millis(250);

/// The longest any retry waits.
pub const MAX_RETRY_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// The default attempt ceiling.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 25;

/// How long to wait before retrying a failed batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDelay", into = "RawDelay")]
pub enum RetryDelay {
    /// Wait the same (positive) duration before every retry.
    Fixed(Duration),

    /// Wait `250ms × 2^(attempts-1)`.
    Exponential,
}

impl RetryDelay {
    /// A constant delay. Zero is rejected; a retry loop with no wait would
    /// spin against a failing collaborator.
    pub fn fixed(delay: Duration) -> Result<Self, ConfigError> {
        if delay.is_zero() {
            Err(ConfigError::ZeroDelay)
        } else {
            Ok(RetryDelay::Fixed(delay))
        }
    }

    fn wait(&self, attempts: u32) -> Duration {
        match *self {
            RetryDelay::Fixed(delay) => delay,
            RetryDelay::Exponential => {
                let doublings = attempts.saturating_sub(1);
                match 1u32.checked_shl(doublings) {
                    Some(factor) => EXPONENTIAL_BASE.saturating_mul(factor),
                    None => MAX_RETRY_WAIT,
                }
            }
        }
    }
}

impl Default for RetryDelay {
    fn default() -> Self {
        RetryDelay::Exponential
    }
}

impl Display for RetryDelay {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RetryDelay::Fixed(delay) => write!(f, "{}", delay.as_millis()),
            RetryDelay::Exponential => f.write_str("exponential"),
        }
    }
}

/// Parses either `"exponential"` or a number of milliseconds.
impl FromStr for RetryDelay {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.eq_ignore_ascii_case("exponential") {
            return Ok(RetryDelay::Exponential);
        }

        match s.parse::<u64>() {
            Ok(millis) => RetryDelay::fixed(Duration::from_millis(millis)),
            Err(..) => Err(ConfigError::UnknownDelay(s.to_owned())),
        }
    }
}

// Wire shape of a delay: a bare number of milliseconds, or a name.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawDelay {
    Millis(u64),
    Named(String),
}

impl TryFrom<RawDelay> for RetryDelay {
    type Error = ConfigError;

    fn try_from(raw: RawDelay) -> Result<Self, Self::Error> {
        match raw {
            RawDelay::Millis(millis) => RetryDelay::fixed(Duration::from_millis(millis)),
            RawDelay::Named(name) => name.parse(),
        }
    }
}

impl From<RetryDelay> for RawDelay {
    fn from(delay: RetryDelay) -> Self {
        match delay {
            RetryDelay::Fixed(delay) => {
                RawDelay::Millis(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
            }
            RetryDelay::Exponential => RawDelay::Named("exponential".to_owned()),
        }
    }
}

/// Retry policy for failed batches. Missing fields deserialize to their
/// defaults, so `{"max": 3}` keeps the exponential delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Wait before each retry.
    pub delay: RetryDelay,

    /// Retries stop once the most-attempted key of a batch has been tried
    /// this many times.
    pub max: NonZeroU32,
}

impl Default for RetryConfig {
    /// Returns a policy with:
    /// - `delay = exponential`;
    /// - `max = 25`.
    fn default() -> Self {
        Self {
            delay: RetryDelay::Exponential,
            max: NonZeroU32::new(DEFAULT_MAX_ATTEMPTS).unwrap_or(NonZeroU32::MIN),
        }
    }
}

impl RetryConfig {
    /// True if a batch whose most-attempted key has `attempts` attempts may
    /// be retried.
    #[inline]
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max.get()
    }

    /// The wait before retrying a batch whose most-attempted key has
    /// `attempts` attempts.
    ///
    /// Capped at [`MAX_RETRY_WAIT`].
    #[inline]
    pub fn delay_for(&self, attempts: u32) -> Duration {
        self.delay.wait(attempts).min(MAX_RETRY_WAIT)
    }
}
