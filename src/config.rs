//! # Loader configuration.
//!
//! [`LoaderConfig`] collects the settings a [`Loader`](crate::Loader) can be
//! built with and later reconfigured through its setters:
//! - `throttle`: the batching window (`0` = flush on the next executor turn);
//! - `retry`: the [`RetryConfig`] for failed batches.
//!
//! The serialized shape is
//! `{"throttle_ms": 0, "retry": {"delay": "exponential", "max": 25}}`; every
//! field is optional and falls back to its default.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::backoff::RetryConfig;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Width of the batching window. Requests arriving while a window is
    /// open join it; they do not extend it.
    #[serde(rename = "throttle_ms", with = "millis")]
    pub throttle: Duration,

    /// Retry policy for failed batches.
    pub retry: RetryConfig,
}

impl LoaderConfig {
    /// Returns the batching window as an `Option` (`None` if zero).
    #[inline]
    pub fn throttle_window(&self) -> Option<Duration> {
        if self.throttle.is_zero() {
            None
        } else {
            Some(self.throttle)
        }
    }
}

mod millis {
    use super::*;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
