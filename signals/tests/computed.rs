use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ripple_signals::{Computed, Get, Peek, Signal, Subscribe};

mod common;
use common::change_watcher;

#[test]
fn derived_subscriber_sees_derived_values() {
    let count = Signal::new(0);
    let doubled = Computed::new({
        let count = count.clone();
        move || count.get() * 2
    });

    let (watcher, check) = change_watcher();
    let _sub = doubled.subscribe(watcher);

    count.set(3);
    assert_eq!(check(), [(6, Some(0))]);

    // The derived value does not change, so the subscriber stays quiet.
    count.set(3);
    assert!(check().is_empty());
}

#[test]
fn intermediate_recomputes_once_per_write() {
    let count = Signal::new(0);
    let mid_runs = Arc::new(AtomicUsize::new(0));

    let doubled = Computed::new({
        let count = count.clone();
        let mid_runs = mid_runs.clone();
        move || {
            mid_runs.fetch_add(1, Ordering::SeqCst);
            count.get() * 2
        }
    });
    let quadrupled = Computed::new({
        let doubled = doubled.clone();
        move || doubled.get() * 2
    });

    let (watcher, check) = change_watcher();
    let _sub = quadrupled.subscribe(watcher);
    assert_eq!(mid_runs.load(Ordering::SeqCst), 1); // priming run

    count.set(3);
    assert_eq!(check(), [(12, Some(0))]);
    assert_eq!(mid_runs.load(Ordering::SeqCst), 2); // exactly one more
}

#[test]
fn dynamic_dependencies_retrack_on_every_run() {
    let pick_first = Signal::new(true);
    let first = Signal::new(1);
    let second = Signal::new(10);

    let selected = Computed::new({
        let pick_first = pick_first.clone();
        let first = first.clone();
        let second = second.clone();
        move || if pick_first.get() { first.get() } else { second.get() }
    });

    let (watcher, check) = change_watcher();
    let _sub = selected.subscribe(watcher);

    first.set(5);
    assert_eq!(check(), [(5, Some(1))]);

    pick_first.set(false);
    assert_eq!(check(), [(10, Some(5))]);

    // The untaken branch is no longer a dependency.
    first.set(100);
    assert!(check().is_empty());

    second.set(50);
    assert_eq!(check(), [(50, Some(10))]);
}

#[test]
fn equality_short_circuits_through_a_chain() {
    let level = Signal::new(5);
    let band = Computed::new({
        let level = level.clone();
        move || if level.get() > 3 { "high".to_string() } else { "low".to_string() }
    });

    let (watcher, check) = change_watcher();
    let _sub = band.subscribe(watcher);

    level.set(10); // still "high": no notification
    assert!(check().is_empty());

    level.set(1);
    assert_eq!(check(), [("low".to_string(), Some("high".to_string()))]);

    level.set(2); // still "low": the stable-deps probe stays quiet
    assert!(check().is_empty());
}

#[test]
fn dirty_computed_stays_lazy_until_read() {
    let count = Signal::new(1);
    let runs = Arc::new(AtomicUsize::new(0));
    let derived = Computed::new({
        let count = count.clone();
        let runs = runs.clone();
        move || {
            runs.fetch_add(1, Ordering::SeqCst);
            count.get() + 1
        }
    });

    assert_eq!(derived.get(), 2);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // The write dirties the computed but must not run the calculation:
    // nothing is listening.
    count.set(5);
    assert!(derived.is_dirty());
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    assert_eq!(derived.get(), 6);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn computed_restarts_after_losing_all_subscribers() {
    let count = Signal::new(1);
    let runs = Arc::new(AtomicUsize::new(0));
    let derived = Computed::new({
        let count = count.clone();
        let runs = runs.clone();
        move || {
            runs.fetch_add(1, Ordering::SeqCst);
            count.get() * 10
        }
    });

    let (watcher, check) = change_watcher();
    let sub = derived.subscribe(watcher);
    count.set(2);
    assert_eq!(check(), [(20, Some(10))]);

    // Detached: writes no longer reach the calculation at all.
    sub.unsubscribe();
    let runs_after_detach = runs.load(Ordering::SeqCst);
    count.set(3);
    assert_eq!(runs.load(Ordering::SeqCst), runs_after_detach);

    // A fresh read rebuilds from current source values.
    assert_eq!(derived.get(), 30);

    // And a fresh subscription works end to end again.
    let (watcher, check) = change_watcher();
    let _sub = derived.subscribe(watcher);
    count.set(4);
    assert_eq!(check(), [(40, Some(30))]);
}

#[test]
fn fixed_dependency_lists_ignore_other_reads() {
    let tracked = Signal::new(1);
    let ignored = Signal::new(100);

    let combined = Computed::with_deps(
        {
            let tracked = tracked.clone();
            let ignored = ignored.clone();
            move || tracked.get() + ignored.get()
        },
        &[&tracked],
    );

    let (watcher, check) = change_watcher();
    let _sub = combined.subscribe(watcher);

    // Not in the dependency list: no recompute, no notification.
    ignored.set(200);
    assert!(check().is_empty());

    // In the list: recomputes and reads the current value of both.
    tracked.set(2);
    assert_eq!(check(), [(202, Some(101))]);
}

#[test]
fn first_notification_after_lazy_subscribe_has_no_old_value() {
    let count = Signal::new(2);
    let doubled = Computed::new({
        let count = count.clone();
        move || count.get() * 2
    });

    let (watcher, check) = change_watcher();
    let mut sub = None;
    ripple_signals::batch(|| {
        // Inside a batch the subscription cannot prime the value, so the
        // first read performs the never-computed transition.
        sub = Some(doubled.subscribe(watcher));
        assert_eq!(doubled.get(), 4);
    });
    assert_eq!(check(), [(4, None)]);
    drop(sub);
}

#[test]
fn dependency_shift_after_stable_runs_still_notifies() {
    // Two identical-source runs arm the equality-probe path; the write that
    // then flips the branch must still re-track, or the subscriber would be
    // stranded on the old dependency set.
    let pick_first = Signal::new(true);
    let first = Signal::new(1);
    let second = Signal::new(10);

    let selected = Computed::new({
        let pick_first = pick_first.clone();
        let first = first.clone();
        let second = second.clone();
        move || if pick_first.get() { first.get() } else { second.get() }
    });

    let (watcher, check) = change_watcher();
    let _sub = selected.subscribe(watcher);

    first.set(2);
    first.set(3);
    assert_eq!(check(), [(2, Some(1)), (3, Some(2))]);

    pick_first.set(false);
    assert_eq!(check(), [(10, Some(3))]);

    // The new branch is live: its writes reach the subscriber.
    second.set(50);
    assert_eq!(check(), [(50, Some(10))]);

    // And the abandoned branch is silent.
    first.set(99);
    assert!(check().is_empty());
}

#[test]
fn peek_does_not_track_but_does_refresh() {
    let count = Signal::new(1);
    let doubled = Computed::new({
        let count = count.clone();
        move || count.get() * 2
    });

    assert_eq!(doubled.peek(), 2);
    count.set(3);
    assert_eq!(doubled.peek(), 6);
}
