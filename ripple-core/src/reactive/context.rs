//! Tracking Context
//!
//! The tracking context records which tracker is currently running. When a
//! store is read, the store asks the context for the active tracker and
//! registers it as a dependent of the key that was read.
//!
//! # Implementation
//!
//! We use a thread-local stack rather than a single global slot. Entering a
//! tracked execution pushes the tracker; the returned guard pops it again when
//! dropped, even if the tracked function panics. A tracker that writes to a
//! store (and so synchronously re-runs some other tracker) therefore gets its
//! own attribution back once the nested run is finished.
//!
//! `untracked` pushes an empty entry, which hides every tracker below it.

use std::cell::RefCell;
use std::sync::Arc;

use super::tracker::{Tracker, TrackerId};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Option<Arc<Tracker>>>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the context when dropped.
pub struct TrackingContext {
    tracker_id: Option<TrackerId>,
}

impl TrackingContext {
    /// Enter a tracked execution for the given tracker.
    ///
    /// While the guard is alive, every store read registers `tracker` as a
    /// dependent of the key that was read.
    pub fn enter(tracker: Arc<Tracker>) -> Self {
        let tracker_id = Some(tracker.id());
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(Some(tracker)));
        Self { tracker_id }
    }

    /// Suspend tracking until the guard is dropped.
    pub fn suspend() -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(None));
        Self { tracker_id: None }
    }

    /// Check if a tracker is currently collecting dependencies.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
    }

    /// The tracker reads are attributed to right now, if any.
    pub fn current() -> Option<Arc<Tracker>> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().cloned().flatten())
    }

    /// Depth of the context stack, including suspended entries.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for TrackingContext {
    fn drop(&mut self) {
        // The thread-local may already be gone during thread teardown.
        let _ = CONTEXT_STACK.try_with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = popped {
                let popped_id = entry.as_ref().map(|tracker| tracker.id());
                debug_assert_eq!(
                    popped_id, self.tracker_id,
                    "TrackingContext mismatch: expected {:?}, got {:?}",
                    self.tracker_id, popped_id
                );
            }
        });
    }
}

/// Run `f` without registering any dependencies.
///
/// Reads inside `f` still return current values; they just do not subscribe
/// the surrounding tracker.
pub fn untracked<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let _ctx = TrackingContext::suspend();
    f()
}
