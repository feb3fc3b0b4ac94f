//! Observable Store
//!
//! An [`Observable`] wraps a key/value record. Reads made while a tracker is
//! running subscribe that tracker to the key; writes notify listeners and
//! re-schedule every tracker subscribed to the written key.
//!
//! # How a Write Flows
//!
//! 1. `set` compares the new value with the stored one. Equal values are a
//!    no-op: no change record, no listeners, no trackers.
//!
//! 2. A [`Change`] is built once and passed to every pre-update listener.
//!
//! 3. The mutation is applied, then every post-update listener runs.
//!
//! 4. The trackers subscribed to the key are snapshotted and each is handed
//!    to the scheduler.
//!
//! # Locking
//!
//! State sits behind `parking_lot` locks that are released before any
//! listener or tracker runs, so callbacks are free to read and write the same
//! store again.
//!
//! # Memory Layout
//!
//! Each store shares, across its clones:
//! - The backing map (insertion ordered)
//! - The pre/post listener lists
//! - A map from key to the ordered set of trackers reading it

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::trace;

use super::context::TrackingContext;
use super::notifier::{Change, Listener, Notifier, Subscription};
use super::scheduler;
use super::tracker::{Tracker, TrackerId};
use crate::error::{ReactiveError, Result};

/// Trackers subscribed to each key, in subscription order.
type Dependents = HashMap<String, IndexMap<TrackerId, Arc<Tracker>>>;

struct Inner<V> {
    data: RwLock<IndexMap<String, V>>,
    notifier: Notifier<V>,

    /// Kept in its own allocation so disposal actions can hold it weakly
    /// without keeping the data alive.
    dependents: Arc<Mutex<Dependents>>,
}

/// A reactive key/value store.
///
/// Clones share the same state. The default value type is
/// [`serde_json::Value`].
///
/// # Example
///
/// ```rust,ignore
/// let store = wrap([("a", json!(1))]);
/// let log = Arc::new(Mutex::new(Vec::new()));
///
/// let (reader, sink) = (store.clone(), log.clone());
/// let dispose = autorun(move || sink.lock().push(reader.get("a")));
///
/// store.set("a", json!(2)); // log: [1, 2]
/// store.set("a", json!(2)); // unchanged, no re-run
/// dispose.dispose();
/// store.set("a", json!(3)); // no re-run
/// ```
pub struct Observable<V = Value>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<Inner<V>>,
}

impl<V> Observable<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create an empty store.
    pub fn new() -> Self {
        Self::wrap(std::iter::empty::<(String, V)>())
    }

    /// Wrap an existing record.
    pub fn wrap<I, K>(source: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
    {
        let data = source
            .into_iter()
            .map(|(key, value)| (key.into(), value))
            .collect();

        Self {
            inner: Arc::new(Inner {
                data: RwLock::new(data),
                notifier: Notifier::new(),
                dependents: Arc::new(Mutex::new(HashMap::new())),
            }),
        }
    }

    /// Get the current value for `key`.
    ///
    /// If a tracker is running, it is subscribed to `key`.
    pub fn get(&self, key: &str) -> Option<V> {
        self.track(key);
        self.get_untracked(key)
    }

    /// Get the current value without subscribing anything.
    pub fn get_untracked(&self, key: &str) -> Option<V> {
        self.inner.data.read().get(key).cloned()
    }

    /// Check whether `key` is present. Tracked like [`get`](Self::get).
    pub fn contains_key(&self, key: &str) -> bool {
        self.track(key);
        self.inner.data.read().contains_key(key)
    }

    /// Write `value` under `key`.
    ///
    /// Writing a value equal to the stored one does nothing. Always returns
    /// `true`, like a successful property assignment.
    pub fn set(&self, key: impl Into<String>, value: V) -> bool {
        let key = key.into();
        let old_value = {
            let data = self.inner.data.read();
            match data.get(&key) {
                Some(current) if *current == value => return true,
                current => current.cloned(),
            }
        };

        let change = Change::update(key, old_value, value.clone());
        self.inner.notifier.notify_pre(&change);
        self.inner.data.write().insert(change.key.clone(), value);
        self.inner.notifier.notify_post(&change);
        self.notify_dependents(&change.key);

        true
    }

    /// Write a value computed from the current one.
    ///
    /// `f` sees a copy of the current value and runs without any lock held,
    /// so it may write to this store itself.
    pub fn update<F>(&self, key: impl Into<String>, f: F) -> bool
    where
        F: FnOnce(Option<&V>) -> V,
    {
        let key = key.into();
        let current = self.get_untracked(&key);
        let new_value = f(current.as_ref());
        self.set(key, new_value)
    }

    /// Remove `key`, returning the value it held.
    ///
    /// Listeners and dependents are notified even when the key was absent.
    pub fn delete(&self, key: &str) -> Option<V> {
        let old_value = self.get_untracked(key);

        let change = Change::delete(key, old_value);
        self.inner.notifier.notify_pre(&change);
        let removed = self.inner.data.write().shift_remove(key);
        self.inner.notifier.notify_post(&change);
        self.notify_dependents(key);

        removed
    }

    /// Register a listener that runs after every mutation.
    pub fn observe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Change<V>) + Send + Sync + 'static,
    {
        self.observe_arc(Arc::new(listener))
    }

    /// Register a listener that runs before every mutation.
    pub fn pre_observe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Change<V>) + Send + Sync + 'static,
    {
        self.pre_observe_arc(Arc::new(listener))
    }

    /// Register an already shared listener after every mutation.
    ///
    /// The same `Arc` may be registered several times; each
    /// [`Subscription`] removes one registration.
    pub fn observe_arc(&self, listener: Listener<V>) -> Subscription {
        self.inner.notifier.observe(listener)
    }

    /// Register an already shared listener before every mutation.
    pub fn pre_observe_arc(&self, listener: Listener<V>) -> Subscription {
        self.inner.notifier.pre_observe(listener)
    }

    /// Current keys in insertion order. Does not subscribe anything.
    pub fn keys(&self) -> Vec<String> {
        self.inner.data.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.read().is_empty()
    }

    /// Copy of the backing record. Does not subscribe anything.
    pub fn snapshot(&self) -> IndexMap<String, V> {
        self.inner.data.read().clone()
    }

    /// Number of trackers subscribed to `key`.
    pub fn dependent_count(&self, key: &str) -> usize {
        self.inner
            .dependents
            .lock()
            .get(key)
            .map_or(0, IndexMap::len)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.notifier.listener_count()
    }

    pub fn pre_listener_count(&self) -> usize {
        self.inner.notifier.pre_listener_count()
    }

    /// Check whether two handles share the same store.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Subscribe the active tracker, if any, to `key`.
    fn track(&self, key: &str) {
        let Some(tracker) = TrackingContext::current() else {
            return;
        };
        if tracker.is_disposed() {
            return;
        }

        let id = tracker.id();
        {
            let mut dependents = self.inner.dependents.lock();
            let set = dependents.entry(key.to_owned()).or_default();
            if set.contains_key(&id) {
                return;
            }
            set.insert(id, Arc::clone(&tracker));
        }

        trace!(tracker = %id, key, "registered dependency");

        let dependents: Weak<Mutex<Dependents>> = Arc::downgrade(&self.inner.dependents);
        let key = key.to_owned();
        tracker.add_disposal(Box::new(move || {
            let Some(dependents) = dependents.upgrade() else {
                return;
            };
            let mut dependents = dependents.lock();
            if let Some(set) = dependents.get_mut(&key) {
                set.shift_remove(&id);
                if set.is_empty() {
                    dependents.remove(&key);
                }
            }
        }));
    }

    fn notify_dependents(&self, key: &str) {
        let trackers: Vec<Arc<Tracker>> = match self.inner.dependents.lock().get(key) {
            Some(set) => set.values().cloned().collect(),
            None => return,
        };

        trace!(key, trackers = trackers.len(), "scheduling dependents");
        for tracker in trackers {
            scheduler::schedule(tracker);
        }
    }
}

impl Observable<Value> {
    /// Wrap a JSON object.
    ///
    /// Only objects are composite; any other JSON value is rejected.
    pub fn from_json(source: Value) -> Result<Self> {
        match source {
            Value::Object(map) => Ok(Self::wrap(map)),
            other => Err(ReactiveError::NotComposite {
                found: json_type_name(&other),
            }),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl<V> Clone for Observable<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Default for Observable<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for Observable<V>
where
    V: Clone + PartialEq + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("data", &*self.inner.data.read())
            .field("listeners", &self.listener_count())
            .field("pre_listeners", &self.pre_listener_count())
            .finish()
    }
}

/// Wrap a record in a new store.
pub fn wrap<V, I, K>(source: I) -> Observable<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
{
    Observable::wrap(source)
}

/// Wrap a JSON object in a new store.
pub fn wrap_json(source: Value) -> Result<Observable> {
    Observable::from_json(source)
}

/// Register a post-update listener on `target`, which must be an
/// `Observable<V>`.
pub fn observe<V, F>(target: &dyn Any, listener: F) -> Result<Subscription>
where
    V: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&Change<V>) + Send + Sync + 'static,
{
    downcast::<V>(target).map(|store| store.observe(listener))
}

/// Register a pre-update listener on `target`, which must be an
/// `Observable<V>`.
pub fn pre_observe<V, F>(target: &dyn Any, listener: F) -> Result<Subscription>
where
    V: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&Change<V>) + Send + Sync + 'static,
{
    downcast::<V>(target).map(|store| store.pre_observe(listener))
}

fn downcast<V>(target: &dyn Any) -> Result<&Observable<V>>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    target
        .downcast_ref::<Observable<V>>()
        .ok_or(ReactiveError::NotObservable)
}
