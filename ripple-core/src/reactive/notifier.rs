//! Change records and the listener lists that receive them.
//!
//! Every store owns one [`Notifier`]: an ordered list of pre-update listeners
//! (called before the mutation is applied) and an ordered list of post-update
//! listeners (called after). Both see the same [`Change`].

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// What kind of mutation produced a [`Change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// A key was written, whether or not it existed before.
    Update,

    /// A key was deleted.
    Delete,
}

/// A single mutation of a store.
///
/// `None` stands for "absent": `old_value` is `None` when a new key is
/// written, `new_value` is `None` for a delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change<V> {
    pub kind: ChangeKind,
    pub key: String,
    pub old_value: Option<V>,
    pub new_value: Option<V>,
}

impl<V> Change<V> {
    pub fn update(key: impl Into<String>, old_value: Option<V>, new_value: V) -> Self {
        Self {
            kind: ChangeKind::Update,
            key: key.into(),
            old_value,
            new_value: Some(new_value),
        }
    }

    pub fn delete(key: impl Into<String>, old_value: Option<V>) -> Self {
        Self {
            kind: ChangeKind::Delete,
            key: key.into(),
            old_value,
            new_value: None,
        }
    }
}

/// A shared change callback.
pub type Listener<V> = Arc<dyn Fn(&Change<V>) + Send + Sync>;

type ListenerList<V> = Arc<Mutex<Vec<Listener<V>>>>;

/// Pre- and post-update listener lists for one store.
pub struct Notifier<V> {
    pre: ListenerList<V>,
    post: ListenerList<V>,
}

impl<V: 'static> Notifier<V> {
    pub fn new() -> Self {
        Self {
            pre: Arc::new(Mutex::new(Vec::new())),
            post: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Append a listener that runs after each mutation.
    pub fn observe(&self, listener: Listener<V>) -> Subscription {
        Self::push(&self.post, listener)
    }

    /// Append a listener that runs before each mutation.
    pub fn pre_observe(&self, listener: Listener<V>) -> Subscription {
        Self::push(&self.pre, listener)
    }

    pub(crate) fn notify_pre(&self, change: &Change<V>) {
        Self::fan_out(&self.pre, change, "pre");
    }

    pub(crate) fn notify_post(&self, change: &Change<V>) {
        Self::fan_out(&self.post, change, "post");
    }

    pub fn listener_count(&self) -> usize {
        self.post.lock().len()
    }

    pub fn pre_listener_count(&self) -> usize {
        self.pre.lock().len()
    }

    fn push(list: &ListenerList<V>, listener: Listener<V>) -> Subscription {
        list.lock().push(Arc::clone(&listener));

        let list: Weak<Mutex<Vec<Listener<V>>>> = Arc::downgrade(list);
        Subscription::new(move || {
            if let Some(list) = list.upgrade() {
                let mut list = list.lock();
                if let Some(index) = list.iter().position(|l| same_listener(l, &listener)) {
                    list.remove(index);
                }
            }
        })
    }

    fn fan_out(list: &ListenerList<V>, change: &Change<V>, phase: &'static str) {
        // Snapshot so listeners can subscribe or unsubscribe while being called.
        let listeners: Vec<Listener<V>> = list.lock().clone();
        trace!(key = %change.key, phase, listeners = listeners.len(), "notifying listeners");
        for listener in listeners {
            listener(change);
        }
    }
}

impl<V: 'static> Default for Notifier<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn same_listener<V>(a: &Listener<V>, b: &Listener<V>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Handle for removing a listener again.
///
/// Dropping it leaves the listener registered.
pub struct Subscription {
    remove: Box<dyn FnOnce() + Send + Sync>,
}

impl Subscription {
    fn new<F>(remove: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            remove: Box::new(remove),
        }
    }

    /// Remove the listener this subscription was created for.
    ///
    /// Only the first registration of that exact callback is removed.
    pub fn unsubscribe(self) {
        (self.remove)();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
