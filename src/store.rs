//! Per-key resolution records. This is the single source of truth for
//! [`Loader::get_data`] and [`Loader::get_status`].
//!
//! [`Loader::get_data`]: crate::Loader::get_data
//! [`Loader::get_status`]: crate::Loader::get_status

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::hash::Hash;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::error::FetchError;

/// Aggregate resolution status of a set of keys.
///
/// Precedence is `Errored` > `Loading` > `Complete`: a set with any errored
/// member is errored even while other members are still loading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Loading,
    Complete,
    Errored,
}

impl Status {
    /// The stable identifier of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Loading => "LOADING",
            Status::Complete => "COMPLETE",
            Status::Errored => "ERRORED",
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolution record of a single key.
#[derive(Debug)]
pub struct KeyRecord<Value> {
    /// A successful result has been applied.
    pub complete: bool,

    /// The most recent attempt failed and nothing has superseded it.
    pub errored: bool,

    /// The last successfully fetched value.
    pub data: Option<Value>,

    /// Fetch attempts since the key last entered a fresh pending state.
    pub attempts: u32,

    /// The cause of the most recent failure, if the key is errored.
    pub error: Option<Arc<FetchError>>,
}

impl<Value> Default for KeyRecord<Value> {
    fn default() -> Self {
        Self {
            complete: false,
            errored: false,
            data: None,
            attempts: 0,
            error: None,
        }
    }
}

impl<Value: Clone> Clone for KeyRecord<Value> {
    fn clone(&self) -> Self {
        Self {
            complete: self.complete,
            errored: self.errored,
            data: self.data.clone(),
            attempts: self.attempts,
            error: self.error.clone(),
        }
    }
}

/// Who is asking for a key to be (re)fetched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Origin {
    /// A caller of `request_data`. Re-requesting an errored key starts a
    /// fresh retry budget.
    Caller,

    /// The retry policy, after a backoff wait. Attempts keep counting.
    Retry,
}

/// Whether a key may join the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Never requested.
    Fresh,

    /// Errored; admitted after its subscribers see the stale state.
    Stale,

    /// Complete or in flight.
    Refused,
}

#[derive(Debug)]
pub(crate) struct KeyStore<Key, Value> {
    records: HashMap<Key, KeyRecord<Value>>,
}

impl<Key, Value> Default for KeyStore<Key, Value> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
        }
    }
}

impl<Key: Eq + Hash + Clone, Value: Clone> KeyStore<Key, Value> {
    pub(crate) fn record(&self, key: &Key) -> Option<&KeyRecord<Value>> {
        self.records.get(key)
    }

    /// The data of each key, aligned with `keys`.
    pub(crate) fn get(&self, keys: &[Key]) -> Vec<Option<Value>> {
        keys.iter()
            .map(|key| self.records.get(key).and_then(|record| record.data.clone()))
            .collect()
    }

    pub(crate) fn status(&self, keys: &[Key]) -> Status {
        let record = |key: &Key| self.records.get(key);

        if keys.iter().any(|key| record(key).map_or(false, |r| r.errored)) {
            Status::Errored
        } else if keys.iter().any(|key| record(key).map_or(true, |r| !r.complete)) {
            Status::Loading
        } else {
            Status::Complete
        }
    }

    /// The queue check is the caller's; this only looks at the record.
    pub(crate) fn admission(&self, key: &Key) -> Admission {
        match self.records.get(key) {
            None => Admission::Fresh,
            Some(record) if record.errored => Admission::Stale,
            Some(..) => Admission::Refused,
        }
    }

    /// Put a key into the fresh pending state. Previously fetched data is
    /// kept.
    pub(crate) fn mark_pending(&mut self, key: Key, origin: Origin) {
        let record = self.records.entry(key).or_default();

        record.attempts = match origin {
            Origin::Caller if record.errored => 1,
            _ => record.attempts.saturating_add(1),
        };
        record.complete = false;
        record.errored = false;
        record.error = None;
    }

    /// Apply a successful fetch to every key of `batch`. Keys missing from
    /// `values` end up complete with no data.
    pub(crate) fn apply_success(&mut self, batch: &Batch<Key>, mut values: HashMap<Key, Value>) {
        for key in batch {
            let record = self.records.entry(key.clone()).or_default();
            record.complete = true;
            record.errored = false;
            record.data = values.remove(key);
            record.attempts = 0;
            record.error = None;
        }
    }

    /// Mark every key of `batch` errored. `complete` and `data` are left
    /// alone so a prior success is never discarded.
    pub(crate) fn apply_failure(&mut self, batch: &Batch<Key>, error: &Arc<FetchError>) {
        for key in batch {
            let record = self.records.entry(key.clone()).or_default();
            record.errored = true;
            record.error = Some(Arc::clone(error));
        }
    }

    /// The attempt count of the most-attempted key of `batch`.
    pub(crate) fn max_attempts(&self, batch: &Batch<Key>) -> u32 {
        batch
            .iter()
            .filter_map(|key| self.records.get(key))
            .map(|record| record.attempts)
            .max()
            .unwrap_or(0)
    }
}
