//! A scoped subscription to a set of keys.

use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;

use crate::bus::Callback;
use crate::loader::{Loader, Snapshot};
use crate::store::Status;

/// Keeps one callback subscribed to a fixed set of keys, and unsubscribes
/// it from all of them when dropped. Created with [`Loader::watch`].
///
/// This is the shape a consumer that renders some keys usually wants: read
/// the current status and data, re-read whenever the callback fires, retry
/// on demand, and stop listening when it goes away.
pub struct Watch<Key, Value>
where
    Key: Clone + Eq + Hash + Send + Sync + 'static,
    Value: Clone + Send + Sync + 'static,
{
    loader: Loader<Key, Value>,
    keys: Vec<Key>,
    callback: Callback,
}

impl<Key, Value> Watch<Key, Value>
where
    Key: Clone + Eq + Hash + Send + Sync + 'static,
    Value: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(loader: Loader<Key, Value>, keys: Vec<Key>, callback: Callback) -> Self {
        loader.request_data(&keys);

        for key in &keys {
            loader.subscribe(key.clone(), Callback::clone(&callback));
        }

        Self {
            loader,
            keys,
            callback,
        }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn snapshot(&self) -> Snapshot<Value> {
        self.loader.snapshot(&self.keys)
    }

    pub fn status(&self) -> Status {
        self.loader.get_status(&self.keys)
    }

    pub fn data(&self) -> Vec<Option<Value>> {
        self.loader.get_data(&self.keys)
    }

    /// Request the watched keys again. Only errored keys are refetched.
    pub fn retry(&self) {
        self.loader.request_data(&self.keys);
    }
}

impl<Key, Value> Drop for Watch<Key, Value>
where
    Key: Clone + Eq + Hash + Send + Sync + 'static,
    Value: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        for key in &self.keys {
            self.loader.unsubscribe(key, &self.callback);
        }
    }
}

impl<Key, Value> Debug for Watch<Key, Value>
where
    Key: Clone + Eq + Hash + Send + Sync + Debug + 'static,
    Value: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("keys", &self.keys)
            .field("status", &self.status())
            .finish()
    }
}
