//! Integration Tests for the Reactive System
//!
//! These tests verify that stores, trackers, transactions and debounced
//! re-runs work together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use ripple_core::reactive::{in_transaction, untracked, TrackingContext};
use ripple_core::{
    autorun, autorun_async, observe, pre_observe, transaction, wrap, wrap_json, Observable,
    ReactiveError,
};

fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    (count.clone(), count)
}

/// The canonical walk-through: log, no-op write, dispose.
#[test]
fn autorun_logs_changes_until_disposed() {
    let store = wrap_json(json!({ "a": 1 })).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let (reader, sink) = (store.clone(), log.clone());
    let dispose = autorun(move || {
        if let Some(value) = reader.get("a") {
            sink.lock().push(value);
        }
    });
    assert_eq!(*log.lock(), vec![json!(1)]);

    store.set("a", json!(2));
    assert_eq!(*log.lock(), vec![json!(1), json!(2)]);

    store.set("a", json!(2));
    assert_eq!(log.lock().len(), 2);

    dispose.dispose();
    store.set("a", json!(3));
    assert_eq!(log.lock().len(), 2);
    assert_eq!(store.dependent_count("a"), 0);
}

/// Each changing write re-runs the tracker exactly once.
#[test]
fn tracker_reruns_once_per_change() {
    let store = wrap([("a", 0), ("unrelated", 0)]);
    let (count, runs) = counter();

    let reader = store.clone();
    let _dispose = autorun(move || {
        reader.get("a");
        runs.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(count.load(Ordering::SeqCst), 1);

    for n in 1..=5 {
        store.set("a", n);
    }
    assert_eq!(count.load(Ordering::SeqCst), 6);

    store.set("unrelated", 1);
    assert_eq!(count.load(Ordering::SeqCst), 6);
}

/// Deleting a tracked key re-runs its dependents.
#[test]
fn delete_notifies_dependents() {
    let store = wrap([("a", 1)]);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let (reader, sink) = (store.clone(), seen.clone());
    let _dispose = autorun(move || sink.lock().push(reader.get("a")));

    assert_eq!(store.delete("a"), Some(1));
    assert_eq!(*seen.lock(), vec![Some(1), None]);
}

/// N writes inside one transaction cause one re-run, after it ends.
#[test]
fn transaction_batches_reruns() {
    let store = wrap([("first", "Ada".to_string()), ("last", "Byron".to_string())]);
    let names = Arc::new(Mutex::new(Vec::new()));

    let (reader, sink) = (store.clone(), names.clone());
    let _dispose = autorun(move || {
        let full = format!(
            "{} {}",
            reader.get("first").unwrap_or_default(),
            reader.get("last").unwrap_or_default()
        );
        sink.lock().push(full);
    });

    transaction(|| {
        store.set("first", "Augusta".to_string());
        store.set("last", "Lovelace".to_string());
        store.set("first", "Ada".to_string());
        assert_eq!(names.lock().len(), 1);
    });

    assert_eq!(*names.lock(), vec!["Ada Byron", "Ada Lovelace"]);
}

/// Only the outermost transaction flushes.
#[test]
fn nested_transactions_flush_once_at_outermost() {
    let store = wrap([("a", 0)]);
    let (count, runs) = counter();

    let reader = store.clone();
    let _dispose = autorun(move || {
        reader.get("a");
        runs.fetch_add(1, Ordering::SeqCst);
    });

    transaction(|| {
        store.set("a", 1);
        transaction(|| {
            store.set("a", 2);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(in_transaction());
        store.set("a", 3);
    });

    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert!(!in_transaction());
}

/// Trackers triggered by trackers during a flush run in the same flush.
#[test]
fn flush_picks_up_trackers_triggered_during_flush() {
    let source = wrap([("x", 0)]);
    let derived = wrap([("y", 0)]);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let (reader, writer) = (source.clone(), derived.clone());
    let _copy = autorun(move || {
        let x = reader.get("x").unwrap_or_default();
        writer.set("y", x * 10);
    });

    let (reader, sink) = (derived.clone(), seen.clone());
    let _log = autorun(move || sink.lock().push(reader.get("y").unwrap_or_default()));
    assert_eq!(*seen.lock(), vec![0]);

    transaction(|| {
        source.set("x", 1);
        source.set("x", 2);
    });

    assert_eq!(*seen.lock(), vec![0, 20]);
}

/// A tracker disposed while pending does not run at the flush.
#[test]
fn disposed_tracker_skipped_at_flush() {
    let store = wrap([("a", 0)]);
    let (count, runs) = counter();

    let reader = store.clone();
    let dispose = autorun(move || {
        reader.get("a");
        runs.fetch_add(1, Ordering::SeqCst);
    });

    transaction(|| {
        store.set("a", 1);
        dispose.dispose();
    });

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

/// Keys no longer read keep their subscription until disposal.
#[test]
fn stale_dependencies_survive_reruns() {
    let store = wrap([("use_a", true), ("a", false), ("b", false)]);
    let (count, runs) = counter();

    let reader = store.clone();
    let dispose = autorun(move || {
        runs.fetch_add(1, Ordering::SeqCst);
        if reader.get("use_a") == Some(true) {
            reader.get("a");
        } else {
            reader.get("b");
        }
    });

    store.set("use_a", false);
    assert_eq!(count.load(Ordering::SeqCst), 2);

    // "a" is no longer read, but still triggers.
    store.set("a", true);
    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert_eq!(store.dependent_count("a"), 1);
    assert_eq!(store.dependent_count("b"), 1);
    assert_eq!(dispose.tracker().pending_disposals(), 3);

    dispose.dispose();
    for key in ["use_a", "a", "b"] {
        assert_eq!(store.dependent_count(key), 0);
    }
}

/// A nested synchronous re-run does not steal the outer tracker's reads.
#[test]
fn attribution_restored_after_nested_rerun() {
    let store = wrap([("x", 0), ("y", 0), ("z", 0)]);
    let (outer_count, outer_runs) = counter();

    let reader = store.clone();
    let _inner = autorun(move || {
        reader.get("y");
    });

    let reader = store.clone();
    let _outer = autorun(move || {
        let x = reader.get("x").unwrap_or_default();
        // Re-runs the inner tracker synchronously.
        reader.set("y", x + 1);
        reader.get("z");
        outer_runs.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(store.dependent_count("z"), 1);
    assert!(!TrackingContext::is_active());

    store.set("z", 5);
    assert_eq!(outer_count.load(Ordering::SeqCst), 2);
}

/// Reads inside `untracked` never subscribe.
#[test]
fn untracked_reads_do_not_subscribe() {
    let store = wrap([("a", 0), ("b", 0)]);
    let (count, runs) = counter();

    let reader = store.clone();
    let _dispose = autorun(move || {
        reader.get("a");
        untracked(|| reader.get("b"));
        runs.fetch_add(1, Ordering::SeqCst);
    });

    store.set("b", 1);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(store.dependent_count("b"), 0);
}

/// Listener registration through the dynamic entry points.
#[test]
fn observe_rejects_non_observable_and_unsubscribes_exactly_one() {
    let plain: Value = json!({ "a": 1 });
    assert_eq!(
        observe::<Value, _>(&plain, |_| {}).unwrap_err(),
        ReactiveError::NotObservable
    );
    assert_eq!(
        pre_observe::<Value, _>(&plain, |_| {}).unwrap_err(),
        ReactiveError::NotObservable
    );

    let store: Observable = wrap_json(plain).unwrap();
    let (first_count, first) = counter();
    let (second_count, second) = counter();

    let first_sub = observe::<Value, _>(&store, move |_| {
        first.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    let _second_sub = observe::<Value, _>(&store, move |_| {
        second.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    store.set("a", json!(2));
    first_sub.unsubscribe();
    store.set("a", json!(3));

    assert_eq!(first_count.load(Ordering::SeqCst), 1);
    assert_eq!(second_count.load(Ordering::SeqCst), 2);
    assert_eq!(store.listener_count(), 1);
}

/// Listeners run before trackers are scheduled.
#[test]
fn listeners_run_before_dependents() {
    let store = wrap([("a", 0)]);
    let order = Arc::new(Mutex::new(Vec::new()));

    let sink = order.clone();
    let _pre = store.pre_observe(move |change| sink.lock().push(format!("pre:{:?}", change.kind)));
    let sink = order.clone();
    let _post = store.observe(move |change| sink.lock().push(format!("post:{:?}", change.kind)));

    let (reader, sink) = (store.clone(), order.clone());
    let _dispose = autorun(move || {
        reader.get("a");
        sink.lock().push("tracker".to_string());
    });
    order.lock().clear();

    store.set("a", 1);
    store.delete("a");

    assert_eq!(
        *order.lock(),
        vec![
            "pre:Update",
            "post:Update",
            "tracker",
            "pre:Delete",
            "post:Delete",
            "tracker"
        ]
    );
}

/// A burst of triggers collapses into one run, at least `delay` after the last.
#[tokio::test(start_paused = true)]
async fn debounced_tracker_collapses_burst() {
    let store = wrap([("q", 0)]);
    let (count, runs) = counter();

    let reader = store.clone();
    let dispose = autorun_async(
        move || {
            reader.get("q");
            runs.fetch_add(1, Ordering::SeqCst);
        },
        Duration::from_millis(50),
    )
    .unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    for n in 1..=4 {
        store.set("q", n);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // Last trigger was 20ms ago.
    assert_eq!(count.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(29)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(dispose.run_count(), 2);
}

/// Disposing cancels an armed timer.
#[tokio::test(start_paused = true)]
async fn dispose_cancels_pending_timer() {
    let store = wrap([("q", 0)]);
    let (count, runs) = counter();

    let reader = store.clone();
    let dispose = autorun_async(
        move || {
            reader.get("q");
            runs.fetch_add(1, Ordering::SeqCst);
        },
        Duration::from_millis(50),
    )
    .unwrap();

    store.set("q", 1);
    dispose.dispose();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

/// Inside a transaction a delayed tracker runs at the flush, not on a timer.
#[tokio::test(start_paused = true)]
async fn transaction_takes_precedence_over_debounce() {
    let store = wrap([("q", 0)]);
    let (count, runs) = counter();

    let reader = store.clone();
    let _dispose = autorun_async(
        move || {
            reader.get("q");
            runs.fetch_add(1, Ordering::SeqCst);
        },
        Duration::from_millis(50),
    )
    .unwrap();

    transaction(|| {
        store.set("q", 1);
        store.set("q", 2);
    });
    assert_eq!(count.load(Ordering::SeqCst), 2);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

/// Debounced trackers refuse worker-thread timers; plain trackers still work.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn multi_thread_runtime_rejects_debounced_autorun() {
    let store = wrap([("q", 0)]);
    let (count, runs) = counter();

    let reader = store.clone();
    let result = autorun_async(
        move || {
            reader.get("q");
        },
        Duration::from_millis(10),
    );
    assert_eq!(result.unwrap_err(), ReactiveError::MultiThreadRuntime);
    assert_eq!(store.dependent_count("q"), 0);

    let reader = store.clone();
    let _dispose = autorun(move || {
        reader.get("q");
        runs.fetch_add(1, Ordering::SeqCst);
    });
    store.set("q", 1);
    assert_eq!(count.load(Ordering::SeqCst), 2);
}
