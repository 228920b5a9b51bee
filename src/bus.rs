//! # Per-key subscriber registry and synchronous fan-out.
//!
//! Callbacks are registered per key, in order. A callback may be registered
//! under several keys, or several times under the same key; every
//! registration is independent. Removal is by [`Arc`] identity and removes
//! the earliest matching registration.
//!
//! The registry itself never invokes anything. The loader notifies one key at
//! a time: it collects that key's callbacks under its lock, releases the
//! lock, and runs each through [`invoke`] after checking it is still
//! registered. A callback may therefore re-enter the loader (to read status,
//! request more keys, unsubscribe, or destroy it) without deadlocking.

use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

/// A subscriber callback. Registrations are matched by pointer identity, so
/// keep a clone of the `Arc` around to unsubscribe later.
pub type Callback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Wrap a closure as a [`Callback`].
pub fn callback(f: impl Fn() + Send + Sync + 'static) -> Callback {
    Arc::new(f)
}

pub(crate) struct Subscribers<Key> {
    registrations: HashMap<Key, Vec<Callback>>,
}

impl<Key> Default for Subscribers<Key> {
    fn default() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }
}

impl<Key: Eq + Hash> Subscribers<Key> {
    pub(crate) fn subscribe(&mut self, key: Key, callback: Callback) {
        self.registrations.entry(key).or_default().push(callback);
    }

    /// Remove the first registration of `callback` under `key`. Returns
    /// false if there was none.
    pub(crate) fn unsubscribe(&mut self, key: &Key, callback: &Callback) -> bool {
        let callbacks = match self.registrations.get_mut(key) {
            Some(callbacks) => callbacks,
            None => return false,
        };

        let position = match callbacks.iter().position(|cb| Arc::ptr_eq(cb, callback)) {
            Some(position) => position,
            None => return false,
        };

        callbacks.remove(position);
        if callbacks.is_empty() {
            self.registrations.remove(key);
        }

        true
    }

    /// Collect the callbacks registered for each key, in key order and then
    /// registration order.
    pub(crate) fn listeners<'a>(&self, keys: impl IntoIterator<Item = &'a Key>) -> Vec<Callback>
    where
        Key: 'a,
    {
        keys.into_iter()
            .filter_map(|key| self.registrations.get(key))
            .flat_map(|callbacks| callbacks.iter().cloned())
            .collect()
    }

    /// True if `callback` still has a registration under `key`.
    pub(crate) fn is_registered(&self, key: &Key, callback: &Callback) -> bool {
        self.registrations
            .get(key)
            .map_or(false, |callbacks| callbacks.iter().any(|cb| Arc::ptr_eq(cb, callback)))
    }

    #[cfg(test)]
    pub(crate) fn count(&self, key: &Key) -> usize {
        self.registrations.get(key).map_or(0, Vec::len)
    }

    pub(crate) fn clear(&mut self) {
        self.registrations.clear();
    }
}

/// Run one callback. A panic is logged and swallowed.
pub(crate) fn invoke(callback: &Callback) {
    if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
        error!("subscriber callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fan_out(callbacks: Vec<Callback>) {
        callbacks.iter().for_each(invoke);
    }
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Callback, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        let cb = callback(move || {
            handle.fetch_add(1, Ordering::SeqCst);
        });
        (cb, count)
    }

    #[test]
    fn triggers_subscription_callbacks() {
        let mut subscribers = Subscribers::default();
        let (cb, count) = counter();

        subscribers.subscribe("1", cb);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        fan_out(subscribers.listeners(&["1"]));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn only_triggers_the_relevant_callbacks() {
        let mut subscribers = Subscribers::default();
        let (cb1, count1) = counter();
        let (cb2, count2) = counter();

        subscribers.subscribe("1", cb1);
        subscribers.subscribe("2", cb2);
        fan_out(subscribers.listeners(&["2"]));

        assert_eq!(count1.load(Ordering::SeqCst), 0);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn triggers_all_the_relevant_callbacks_in_order() {
        let mut subscribers = Subscribers::default();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            subscribers.subscribe("1", callback(move || order.lock().unwrap().push(label)));
        }

        fan_out(subscribers.listeners(&["1"]));
        assert_eq!(*order.lock().unwrap(), ["first", "second", "third"]);
    }

    #[test]
    fn unsubscribes_callbacks() {
        let mut subscribers = Subscribers::default();
        let (cb1, count1) = counter();
        let (cb2, count2) = counter();

        subscribers.subscribe("1", cb1.clone());
        subscribers.subscribe("1", cb2);
        assert!(subscribers.unsubscribe(&"1", &cb1));
        fan_out(subscribers.listeners(&["1"]));

        assert_eq!(count1.load(Ordering::SeqCst), 0);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn does_not_fail_if_unsubscribed_callback_missing() {
        let mut subscribers = Subscribers::default();
        let (cb1, count1) = counter();
        let (cb2, count2) = counter();

        subscribers.subscribe("1", cb1.clone());
        subscribers.subscribe("1", cb2);
        assert!(subscribers.unsubscribe(&"1", &cb1));
        assert!(!subscribers.unsubscribe(&"1", &cb1));
        assert!(!subscribers.unsubscribe(&"7", &cb1));
        fan_out(subscribers.listeners(&["1"]));

        assert_eq!(count1.load(Ordering::SeqCst), 0);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_registrations_are_independent() {
        let mut subscribers = Subscribers::default();
        let (cb, count) = counter();

        subscribers.subscribe("1", cb.clone());
        subscribers.subscribe("1", cb.clone());
        subscribers.subscribe("2", cb.clone());
        assert_eq!(subscribers.count(&"1"), 2);

        fan_out(subscribers.listeners(&["1", "2"]));
        assert_eq!(count.load(Ordering::SeqCst), 3);

        subscribers.unsubscribe(&"1", &cb);
        assert_eq!(subscribers.count(&"1"), 1);

        fan_out(subscribers.listeners(&["1"]));
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn tracks_whether_a_callback_is_registered() {
        let mut subscribers = Subscribers::default();
        let (cb, _) = counter();

        assert!(!subscribers.is_registered(&"1", &cb));
        subscribers.subscribe("1", cb.clone());
        assert!(subscribers.is_registered(&"1", &cb));
        assert!(!subscribers.is_registered(&"2", &cb));

        subscribers.unsubscribe(&"1", &cb);
        assert!(!subscribers.is_registered(&"1", &cb));
    }

    #[test]
    fn panicking_callback_does_not_stop_fan_out() {
        let mut subscribers = Subscribers::default();
        let (cb, count) = counter();

        subscribers.subscribe("1", callback(|| panic!("bad subscriber")));
        subscribers.subscribe("1", cb);
        fan_out(subscribers.listeners(&["1"]));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
