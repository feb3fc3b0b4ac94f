//! Error types for the reactive system.

use thiserror::Error;

/// Errors reported by the reactive API.
///
/// Everything else is accepted under caller contract; these are the only
/// failures the crate reports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// `observe`/`pre_observe` was given something that was not produced by `wrap`.
    #[error("object is not an observable")]
    NotObservable,

    /// A JSON source that is not an object cannot back a store.
    #[error("cannot observe a non-composite value (found {found})")]
    NotComposite {
        /// JSON type name of the rejected value.
        found: &'static str,
    },

    /// Delayed trackers need a tokio runtime to drive their timers.
    #[error("autorun_async must be called from within a tokio runtime")]
    NoRuntime,

    /// Delayed trackers re-run on the caller's thread, which a multi-thread
    /// runtime cannot guarantee.
    #[error("autorun_async requires a current-thread tokio runtime")]
    MultiThreadRuntime,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;
