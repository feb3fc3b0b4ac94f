//! Ripple Core
//!
//! Fine-grained reactive state for plain key/value records.
//!
//! - Observable stores with tracked reads and change notification
//! - Automatic dependency tracking for `autorun` functions
//! - Synchronous, debounced, and transaction-batched re-runs
//!
//! # Architecture
//!
//! - `reactive`: stores, trackers, scheduling and transactions
//! - `error`: the crate's error type
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::{autorun, transaction, wrap_json};
//! use serde_json::json;
//!
//! let todo = wrap_json(json!({ "title": "write docs", "done": false }))?;
//!
//! let reader = todo.clone();
//! let dispose = autorun(move || {
//!     println!("{:?} done={:?}", reader.get("title"), reader.get("done"));
//! });
//!
//! // Prints once, after both writes.
//! transaction(|| {
//!     todo.set("title", json!("ship it"));
//!     todo.set("done", json!(true));
//! });
//!
//! dispose.dispose();
//! ```

pub mod error;
pub mod reactive;

pub use error::{ReactiveError, Result};
pub use reactive::{
    autorun, autorun_async, autorun_with, in_transaction, observe, pre_observe, transaction,
    untracked, wrap, wrap_json, AutorunOptions, Change, ChangeKind, Dispose, Observable,
    Subscription,
};
