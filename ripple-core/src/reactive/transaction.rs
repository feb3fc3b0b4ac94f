//! Transactions
//!
//! A transaction batches tracker re-runs. While any transaction scope is open
//! on the current thread, triggered trackers are collected into a pending set
//! instead of running. When the outermost scope's function returns, every
//! pending tracker runs once, in the order it was first triggered.
//!
//! # Nesting
//!
//! Nested calls push their own scope and run their function fully, but only
//! the outermost call flushes. After the flush the whole scope stack is reset
//! in one go rather than popped call by call. Trackers triggered during the
//! flush (by writes the flushed trackers make) are still collected, and are
//! run in the same flush unless they already ran in it.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::debug;

use super::tracker::{Tracker, TrackerId};

/// Identifies one `transaction` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ScopeId(u64);

impl ScopeId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Default)]
struct TransactionState {
    /// Open scopes; the first entry is the outermost one.
    stack: SmallVec<[ScopeId; 4]>,

    /// Trackers waiting for the flush, in trigger order.
    pending: IndexMap<TrackerId, Arc<Tracker>>,
}

thread_local! {
    static STATE: RefCell<TransactionState> = RefCell::new(TransactionState::default());
}

/// Run `f` with tracker re-runs batched until the outermost transaction ends.
///
/// ```rust,ignore
/// transaction(|| {
///     store.set("first", json!("Ada"));
///     store.set("last", json!("Lovelace"));
/// }); // a tracker reading both keys runs once, here
/// ```
pub fn transaction<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let scope = ScopeId::new();
    STATE.with(|state| state.borrow_mut().stack.push(scope));
    let _reset = ResetOnPanic(scope);

    let result = f();

    if is_outermost(scope) {
        flush();
    }

    result
}

/// Check if a transaction scope is open on this thread.
pub fn in_transaction() -> bool {
    STATE.with(|state| !state.borrow().stack.is_empty())
}

/// Number of trackers waiting for the current transaction to end.
pub fn pending_count() -> usize {
    STATE.with(|state| state.borrow().pending.len())
}

/// Add a tracker to the pending set. Returns `false` if it was already there.
pub(crate) fn defer(tracker: Arc<Tracker>) -> bool {
    STATE.with(|state| {
        let mut state = state.borrow_mut();
        let id = tracker.id();
        if state.pending.contains_key(&id) {
            return false;
        }
        state.pending.insert(id, tracker);
        debug!(tracker = %id, pending = state.pending.len(), "deferred tracker to transaction end");
        true
    })
}

fn is_outermost(scope: ScopeId) -> bool {
    STATE.with(|state| state.borrow().stack.first() == Some(&scope))
}

fn flush() {
    debug!(pending = pending_count(), "flushing transaction");

    // Indexed walk: the set may grow while trackers run, and the borrow must
    // not be held across a run.
    let mut index = 0;
    loop {
        let next = STATE.with(|state| {
            state
                .borrow()
                .pending
                .get_index(index)
                .map(|(_, tracker)| Arc::clone(tracker))
        });
        let Some(tracker) = next else {
            break;
        };
        tracker.run();
        index += 1;
    }

    STATE.with(|state| {
        let mut state = state.borrow_mut();
        state.pending.clear();
        state.stack.clear();
    });
}

/// Drops the whole batch if the outermost scope unwinds, so later
/// transactions on this thread start clean.
struct ResetOnPanic(ScopeId);

impl Drop for ResetOnPanic {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let _ = STATE.try_with(|state| {
            let mut state = state.borrow_mut();
            if state.stack.first() == Some(&self.0) {
                state.pending.clear();
                state.stack.clear();
            }
        });
    }
}
