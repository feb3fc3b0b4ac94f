//! Scheduler
//!
//! Decides when a triggered tracker actually runs:
//!
//! 1. Inside a transaction: deferred to the end of the outermost scope.
//! 2. With a minimum delay: debounced. Any armed timer is aborted and a new
//!    one started, so a burst of triggers collapses into one trailing run.
//!    Timers live on the current-thread runtime captured by `autorun_async`,
//!    so a debounced run only happens while the caller is awaiting, never in
//!    the middle of another tracker or transaction.
//! 3. Otherwise: run synchronously on the caller's thread.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::debug;

use super::tracker::Tracker;
use super::transaction;

/// Hand a triggered tracker to the scheduler.
pub fn schedule(tracker: Arc<Tracker>) {
    if tracker.is_disposed() {
        return;
    }

    if transaction::in_transaction() {
        transaction::defer(tracker);
        return;
    }

    match tracker.debounce() {
        Some((delay, runtime)) => debounce(&tracker, delay, runtime),
        None => tracker.run(),
    }
}

fn debounce(tracker: &Arc<Tracker>, delay: Duration, runtime: &Handle) {
    debug!(tracker = %tracker.id(), ?delay, "arming debounce timer");

    tracker.arm_timer(|arm| {
        let task = Arc::clone(tracker);
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // A re-armed or disposed tracker no longer owns this timer.
            if task.disarm_timer(arm) {
                task.run();
            }
        })
    });
}
