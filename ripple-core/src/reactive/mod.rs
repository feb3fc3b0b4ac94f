//! Reactive Primitives
//!
//! This module implements observable stores and the trackers that react to
//! them.
//!
//! # Concepts
//!
//! ## Observables
//!
//! An Observable is a key/value record. When a key is read while a tracker is
//! running, the tracker is registered as a dependent of that key. When the
//! key is written with a different value, every dependent is handed to the
//! scheduler.
//!
//! ## Trackers
//!
//! A Tracker is a function started with `autorun`. It runs once immediately
//! and then again whenever a key it read changes. Its dependencies only ever
//! grow until it is disposed.
//!
//! ## Listeners
//!
//! Pre- and post-update listeners see every mutation of one store as a
//! `Change` record, before and after it is applied.
//!
//! ## Transactions
//!
//! A transaction batches tracker re-runs so that a tracker triggered many
//! times inside it runs once, when the outermost transaction ends.
//!
//! # Implementation Notes
//!
//! Dependency attribution uses a thread-local stack of running trackers
//! (see `context`), and transaction state is thread-local too. Debounced
//! trackers re-run from tokio timer tasks.

mod context;
mod notifier;
mod observable;
mod scheduler;
mod tracker;
mod transaction;

pub use context::{untracked, TrackingContext};
pub use notifier::{Change, ChangeKind, Listener, Notifier, Subscription};
pub use observable::{observe, pre_observe, wrap, wrap_json, Observable};
pub use scheduler::schedule;
pub use tracker::{
    autorun, autorun_async, autorun_with, AutorunOptions, Dispose, DisposeAction, Tracker,
    TrackerId,
};
pub use transaction::{in_transaction, pending_count, transaction};
