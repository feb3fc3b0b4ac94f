//! Trackers and the autorun lifecycle.
//!
//! A tracker is a function that re-runs whenever a store key it read is
//! written. It is created by [`autorun`] (or [`autorun_async`] for a debounced
//! tracker) and lives until the returned [`Dispose`] handle is disposed.
//!
//! # Dependencies
//!
//! Every time a store registers a new dependency for a tracker, it also hands
//! the tracker a disposal action that removes that one dependency again. The
//! actions pile up across runs: a re-run re-registers whatever it reads
//! (duplicates are ignored) but never prunes keys it stopped reading. Only
//! [`Dispose::dispose`] drains the list.
//!
//! # Ownership
//!
//! Stores hold their dependent trackers strongly, and a tracker's closure
//! usually holds the store it reads. That cycle is broken by disposal, so a
//! tracker that is never disposed keeps its stores alive.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;
use tracing::debug;

use super::context::TrackingContext;
use crate::error::{ReactiveError, Result};

/// Unique identifier for a tracker.
///
/// Identity of a tracker is its ID: two dependency registrations with the
/// same ID are the same subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackerId(u64);

impl TrackerId {
    /// Generate a new unique tracker ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TrackerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tracker#{}", self.0)
    }
}

/// A cleanup closure that undoes one dependency registration.
pub type DisposeAction = Box<dyn FnOnce() + Send>;

/// Configuration for a tracker.
///
/// ```rust,ignore
/// let options = AutorunOptions::new()
///     .with_name("title-sync")
///     .with_minimum_delay(Duration::from_millis(50));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutorunOptions {
    /// Debounce window for re-runs. `None` or zero re-runs synchronously.
    pub minimum_delay: Option<Duration>,

    /// Label attached to log events.
    pub name: Option<String>,
}

impl AutorunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_minimum_delay(mut self, delay: Duration) -> Self {
        self.minimum_delay = Some(delay);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The delay, if it actually asks for debouncing.
    fn effective_delay(&self) -> Option<Duration> {
        self.minimum_delay.filter(|delay| !delay.is_zero())
    }
}

/// The record behind a running autorun.
pub struct Tracker {
    id: TrackerId,
    name: Option<String>,

    /// The tracking function.
    run: Box<dyn Fn() + Send + Sync>,

    /// Accumulated cleanup for every dependency ever registered.
    disposals: Mutex<Vec<DisposeAction>>,

    /// Debounce window; only set when non-zero.
    minimum_delay: Option<Duration>,

    /// Runtime the debounce timers are spawned on.
    runtime: Option<Handle>,

    /// Pending debounce timer, if one is armed, tagged with the arm count
    /// it was started at.
    timer: Mutex<Option<(u64, JoinHandle<()>)>>,
    timer_arms: AtomicU64,

    disposed: AtomicBool,
    run_count: AtomicUsize,
}

impl Tracker {
    /// Create a tracker without running it.
    ///
    /// A delayed tracker without a runtime handle re-runs synchronously.
    pub fn new<F>(run: F, options: AutorunOptions, runtime: Option<Handle>) -> Arc<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let minimum_delay = options.effective_delay();
        Arc::new(Self {
            id: TrackerId::new(),
            name: options.name,
            run: Box::new(run),
            disposals: Mutex::new(Vec::new()),
            minimum_delay,
            runtime,
            timer: Mutex::new(None),
            timer_arms: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
        })
    }

    pub fn id(&self) -> TrackerId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Debounce window and the runtime to arm timers on.
    pub(crate) fn debounce(&self) -> Option<(Duration, &Handle)> {
        self.minimum_delay.zip(self.runtime.as_ref())
    }

    /// Abort any armed timer and arm a new one.
    ///
    /// `spawn` receives the arm number the new timer must pass to
    /// [`disarm_timer`](Self::disarm_timer) when it fires.
    pub(crate) fn arm_timer<S>(&self, spawn: S)
    where
        S: FnOnce(u64) -> JoinHandle<()>,
    {
        let mut timer = self.timer.lock();
        if let Some((_, pending)) = timer.take() {
            pending.abort();
        }
        let arm = self.timer_arms.fetch_add(1, Ordering::SeqCst) + 1;
        *timer = Some((arm, spawn(arm)));
    }

    /// Clear the timer slot if it still holds the timer started at `arm`.
    pub(crate) fn disarm_timer(&self, arm: u64) -> bool {
        let mut timer = self.timer.lock();
        let current = timer.as_ref().map(|(armed_at, _)| *armed_at);
        if current != Some(arm) {
            return false;
        }
        timer.take();
        true
    }

    pub(crate) fn has_timer(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Execute the tracking function with this tracker as the active context.
    ///
    /// A disposed tracker does nothing.
    pub fn run(self: &Arc<Self>) {
        if self.is_disposed() {
            return;
        }

        debug!(tracker = %self.id, name = ?self.name, "running tracker");

        let _ctx = TrackingContext::enter(Arc::clone(self));
        (self.run)();

        self.run_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Queue a cleanup action for the next disposal.
    pub(crate) fn add_disposal(&self, action: DisposeAction) {
        self.disposals.lock().push(action);
    }

    /// Run every accumulated disposal action, in order, and stop the tracker.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);

        if let Some((_, timer)) = self.timer.lock().take() {
            timer.abort();
        }

        // Released before running: an action may touch a store that in turn
        // wants this tracker's lock.
        let actions = std::mem::take(&mut *self.disposals.lock());
        debug!(tracker = %self.id, actions = actions.len(), "disposing tracker");
        for action in actions {
            action();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Number of completed runs, including the initial one.
    pub fn run_count(&self) -> usize {
        self.run_count.load(Ordering::SeqCst)
    }

    /// Number of dependency cleanups waiting for disposal.
    pub fn pending_disposals(&self) -> usize {
        self.disposals.lock().len()
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("minimum_delay", &self.minimum_delay)
            .field("timer_armed", &self.has_timer())
            .field("run_count", &self.run_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Handle returned by [`autorun`]; disposing it unsubscribes the tracker
/// from every key it ever read.
///
/// Dropping the handle does **not** dispose the tracker.
#[derive(Clone)]
pub struct Dispose {
    tracker: Arc<Tracker>,
}

impl Dispose {
    /// Dispose the tracker. Calling this more than once is harmless.
    pub fn dispose(&self) {
        self.tracker.dispose();
    }

    pub fn id(&self) -> TrackerId {
        self.tracker.id()
    }

    pub fn is_disposed(&self) -> bool {
        self.tracker.is_disposed()
    }

    pub fn run_count(&self) -> usize {
        self.tracker.run_count()
    }

    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }
}

impl fmt::Debug for Dispose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dispose").field(&self.tracker).finish()
    }
}

/// Run `f` now and again whenever a store key it read changes.
///
/// ```rust,ignore
/// let store = wrap([("a", json!(1))]);
/// let reader = store.clone();
/// let dispose = autorun(move || println!("a = {:?}", reader.get("a")));
///
/// store.set("a", json!(2)); // prints "a = Some(Number(2))"
/// dispose.dispose();
/// ```
pub fn autorun<F>(f: F) -> Dispose
where
    F: Fn() + Send + Sync + 'static,
{
    start(Tracker::new(f, AutorunOptions::default(), None))
}

/// Like [`autorun`], but re-runs are debounced by `delay`.
///
/// The initial run is synchronous. Re-runs are driven by timers on the
/// current tokio runtime, so this must be called from inside one, and that
/// runtime must be single-threaded: a timer firing on a worker thread would
/// run the tracker alongside the caller's own code.
pub fn autorun_async<F>(f: F, delay: Duration) -> Result<Dispose>
where
    F: Fn() + Send + Sync + 'static,
{
    autorun_with(AutorunOptions::new().with_minimum_delay(delay), f)
}

/// [`autorun`] with explicit options.
pub fn autorun_with<F>(options: AutorunOptions, f: F) -> Result<Dispose>
where
    F: Fn() + Send + Sync + 'static,
{
    let runtime = match options.effective_delay() {
        Some(_) => Some(current_thread_runtime()?),
        None => None,
    };

    Ok(start(Tracker::new(f, options, runtime)))
}

fn current_thread_runtime() -> Result<Handle> {
    let handle = Handle::try_current().map_err(|_| ReactiveError::NoRuntime)?;
    match handle.runtime_flavor() {
        RuntimeFlavor::CurrentThread => Ok(handle),
        _ => Err(ReactiveError::MultiThreadRuntime),
    }
}

fn start(tracker: Arc<Tracker>) -> Dispose {
    debug!(tracker = %tracker.id(), delay = ?tracker.minimum_delay, "starting autorun");
    tracker.run();
    Dispose { tracker }
}
