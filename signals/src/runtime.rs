//! Batch state and the flush engine.
//!
//! All writes propagate through here. An unbatched write opens a micro-batch
//! around its own notification pass; an explicit [`batch`] defers every
//! notification until the outermost scope closes. Either way the pending
//! queues drain in the same bounded loop: notifications settle first so
//! effects never observe a stale computed, then queued effects run, and the
//! loop repeats because effects may write signals and queue more work.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};

use tracing::{trace, warn};

use crate::graph::NodeId;

/// Upper bound on flush passes. A feedback loop still scheduling work past
/// this is abandoned and its remaining work discarded.
pub(crate) const MAX_FLUSH_PASSES: usize = 100;

struct PendingNotification {
    key: NodeId,
    run: Box<dyn FnOnce()>,
}

thread_local! {
    static BATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
    static PENDING_NOTIFICATIONS: RefCell<Vec<PendingNotification>> =
        const { RefCell::new(Vec::new()) };
    static PENDING_EFFECTS: RefCell<Vec<Box<dyn FnOnce()>>> = const { RefCell::new(Vec::new()) };
}

/// True while inside an explicit [`batch`] or the micro-batch the engine
/// opens around a single unbatched write.
pub fn is_batching() -> bool {
    BATCH_DEPTH.with(|depth| depth.get() > 0)
}

/// Queue the notification pass for `key`, coalescing with any record already
/// queued for it. The first record wins, so subscribers see the old value
/// from before the batch even when a node changes several times inside it.
pub(crate) fn queue_notification(key: NodeId, run: impl FnOnce() + 'static) {
    PENDING_NOTIFICATIONS.with(|pending| {
        let mut pending = pending.borrow_mut();
        if pending.iter().any(|record| record.key == key) {
            return;
        }
        pending.push(PendingNotification { key, run: Box::new(run) });
    });
}

/// Queue an effect execution. Callers coalesce through the effect's own
/// queued flag before reaching here.
pub(crate) fn queue_effect(run: impl FnOnce() + 'static) {
    PENDING_EFFECTS.with(|pending| pending.borrow_mut().push(Box::new(run)));
}

/// Queue `run` when a batch is open, otherwise run it now inside a fresh
/// micro-batch so transitively triggered work flushes before the caller
/// regains control.
pub(crate) fn dispatch_notification(key: NodeId, run: impl FnOnce() + 'static) {
    if is_batching() {
        queue_notification(key, run);
    } else {
        micro_batch(run);
    }
}

struct BatchScope {
    outermost: bool,
}

impl BatchScope {
    fn enter() -> Self {
        let depth = BATCH_DEPTH.with(|depth| {
            let next = depth.get() + 1;
            depth.set(next);
            next
        });
        Self { outermost: depth == 1 }
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        BATCH_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// Run `f` as a batch: writes inside coalesce per node and subscribers are
/// notified once, at the close of the outermost batch, with the final value
/// and the pre-batch old value.
///
/// A panic from `f` propagates, but only after the pending work has flushed;
/// side effects of writes that happened before the panic are not suppressed.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let scope = BatchScope::enter();
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    if scope.outermost {
        flush();
    }
    drop(scope);
    match result {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// Open a micro-batch around a single unbatched notification burst.
pub(crate) fn micro_batch(f: impl FnOnce()) {
    let scope = BatchScope::enter();
    f();
    if scope.outermost {
        flush();
    }
}

/// Drain both queues until empty or the pass limit is hit.
fn flush() {
    for _ in 0..MAX_FLUSH_PASSES {
        let mut ran_any = false;

        // Settle notifications fully so effects never read a stale computed.
        loop {
            let pass: Vec<PendingNotification> =
                PENDING_NOTIFICATIONS.with(|pending| std::mem::take(&mut *pending.borrow_mut()));
            if pass.is_empty() {
                break;
            }
            ran_any = true;
            trace!(count = pass.len(), "draining pending notifications");
            for record in pass {
                (record.run)();
            }
        }

        let effects: Vec<Box<dyn FnOnce()>> =
            PENDING_EFFECTS.with(|pending| std::mem::take(&mut *pending.borrow_mut()));
        if !effects.is_empty() {
            ran_any = true;
            trace!(count = effects.len(), "running queued effects");
            for run in effects {
                run();
            }
        }

        if !ran_any {
            return;
        }
    }

    let notifications =
        PENDING_NOTIFICATIONS.with(|pending| std::mem::take(&mut *pending.borrow_mut()));
    let effects = PENDING_EFFECTS.with(|pending| std::mem::take(&mut *pending.borrow_mut()));
    warn!(
        notifications = notifications.len(),
        effects = effects.len(),
        "flush pass limit reached; discarding remaining reactive work"
    );
}
