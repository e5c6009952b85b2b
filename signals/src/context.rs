//! The tracker: which derivation is currently executing.
//!
//! Reads entering a signal or computed consult the top of the observer stack
//! and, if a derivation is running, register the edge with it. The stack is
//! strictly thread-local; the engine is single-threaded cooperative.

use std::cell::RefCell;
use std::sync::Arc;

use crate::graph::Observer;
use crate::signal::Observable;

thread_local! {
    static OBSERVER_STACK: RefCell<Vec<Option<Arc<dyn Observer>>>> =
        const { RefCell::new(Vec::new()) };
}

/// Manages the current-observer stack and forwards tracked reads to it.
pub struct CurrentObserver;

impl CurrentObserver {
    /// Register `source` with the current observer, if a derivation is
    /// running and tracking.
    pub fn track<S: Observable + ?Sized>(source: &S) {
        let observer = OBSERVER_STACK.with(|stack| stack.borrow().last().cloned().flatten());
        if let Some(observer) = observer {
            observer.observe(source.source());
        }
    }

    /// Run `f` with `observer` current, restoring the previous observer on
    /// every exit path, unwinding included.
    pub(crate) fn with_observer<R>(observer: Arc<dyn Observer>, f: impl FnOnce() -> R) -> R {
        let _frame = Frame::push(Some(observer));
        f()
    }

    /// Run `f` with no observer current; reads inside are not tracked.
    pub(crate) fn untracked<R>(f: impl FnOnce() -> R) -> R {
        let _frame = Frame::push(None);
        f()
    }

    /// Whether a derivation is currently tracking reads.
    pub fn is_tracking() -> bool {
        OBSERVER_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
    }
}

/// Stack frame that pops itself when dropped.
struct Frame;

impl Frame {
    fn push(observer: Option<Arc<dyn Observer>>) -> Self {
        OBSERVER_STACK.with(|stack| stack.borrow_mut().push(observer));
        Frame
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        OBSERVER_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Run `f` without dependency tracking: reads inside register no edges, even
/// when a derivation is executing further up the stack.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    CurrentObserver::untracked(f)
}
