//! The set of keys passed into a fetch function.

use std::collections::HashMap;
use std::hash::Hash;
use std::slice;

use indexmap::IndexSet;

/// A set of keys passed into a fetch function. Use the `keys` method to get
/// the keys, all of which are unique and in the order they were first
/// requested, so that you can execute your request. Then, use `into_values`
/// or `try_into_values` to pair your response data with its keys.
///
/// The batch is a copy; the loader keeps its own list of the keys in flight,
/// so there is nothing a fetch function can do to a batch that affects which
/// keys the result is applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<Key> {
    keys: Vec<Key>,
}

impl<Key> Batch<Key> {
    /// Check if there are any keys in this batch.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Get the number of keys in this batch.
    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// The keys of this batch. These are guaranteed to be:
    ///
    /// - Unique
    /// - In first-requested order
    #[inline]
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, Key> {
        self.keys.iter()
    }

    /// Callers are responsible for uniqueness; the scheduler's queue is the
    /// only producer.
    pub(crate) fn from_unique(keys: Vec<Key>) -> Self {
        Self { keys }
    }
}

impl<Key: Eq + Hash + Clone> Batch<Key> {
    /// After you've completed your request, use this method to pair each
    /// key with its value.
    pub fn into_values<Value>(
        self,
        mut get_value: impl FnMut(&Key) -> Value,
    ) -> HashMap<Key, Value> {
        self.keys
            .into_iter()
            .map(move |key| {
                let value = get_value(&key);
                (key, value)
            })
            .collect()
    }

    /// Fallible version of into_values. Same as into_values, but will return
    /// an error the first time `get_value` returns an error.
    pub fn try_into_values<Value, Error>(
        self,
        mut get_value: impl FnMut(&Key) -> Result<Value, Error>,
    ) -> Result<HashMap<Key, Value>, Error> {
        self.keys
            .into_iter()
            .map(move |key| {
                let value = get_value(&key)?;
                Ok((key, value))
            })
            .collect()
    }
}

/// Collect keys into a batch, dropping repeats after their first occurrence.
impl<Key: Eq + Hash> FromIterator<Key> for Batch<Key> {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        let keys: IndexSet<Key> = iter.into_iter().collect();
        Self::from_unique(keys.into_iter().collect())
    }
}

impl<'a, Key> IntoIterator for &'a Batch<Key> {
    type Item = &'a Key;
    type IntoIter = slice::Iter<'a, Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

impl<Key> IntoIterator for Batch<Key> {
    type Item = Key;
    type IntoIter = std::vec::IntoIter<Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_iter()
    }
}
