//! Side effects that re-run when their dependencies change.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError, Weak};

use tracing::{debug, trace};

use crate::context::CurrentObserver;
use crate::graph::{DepState, NodeId, Observer, SourceRef};
use crate::listeners::ListenerGuard;
use crate::runtime;
use crate::signal::Observable;

/// Teardown an effect run leaves behind, executed before the next run and
/// once more at disposal.
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// Conversion for effect-callback return values: nothing, or an optional
/// cleanup closure.
pub trait IntoCleanup {
    fn into_cleanup(self) -> Option<Cleanup>;
}

impl IntoCleanup for () {
    fn into_cleanup(self) -> Option<Cleanup> { None }
}

impl<F: FnOnce() + Send + 'static> IntoCleanup for Option<F> {
    fn into_cleanup(self) -> Option<Cleanup> { self.map(|f| Box::new(f) as Cleanup) }
}

type EffectFn = Box<dyn FnMut() -> Option<Cleanup> + Send>;

pub(crate) struct EffectInner {
    id: NodeId,
    run_fn: Mutex<EffectFn>,
    cleanup: Mutex<Option<Cleanup>>,
    deps: Mutex<DepState>,
    cancelled: AtomicBool,
    queued: AtomicBool,
    auto_track: bool,
}

/// Handle to a running effect.
///
/// The callback runs once, synchronously, at creation, and again whenever a
/// dependency changes. Dropping the handle disposes the effect: the final
/// cleanup runs exactly once and every subscription detaches.
///
/// ```
/// use ripple_signals::{Effect, Get, Signal};
///
/// let name = Signal::new("ada".to_string());
/// let effect = Effect::new({
///     let name = name.clone();
///     move || println!("hello, {}", name.get())
/// });
///
/// name.set("grace".to_string()); // prints again
/// drop(effect); // further writes are ignored
/// ```
#[must_use = "dropping the handle disposes the effect; keep it or call forget()"]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Run `f` now, tracking the signals and computeds it reads, then re-run
    /// it whenever one of them changes. `f` may return `Some(cleanup)`; the
    /// cleanup runs before the next execution and once at disposal.
    pub fn new<F, C>(mut f: F) -> Self
    where
        F: FnMut() -> C + Send + 'static,
        C: IntoCleanup,
    {
        Self::build(Box::new(move || f().into_cleanup()), DepState::new(), true)
    }

    /// Fixed dependency list; reads inside `f` are not tracked.
    pub fn with_deps<F, C>(mut f: F, deps: &[&dyn Observable]) -> Self
    where
        F: FnMut() -> C + Send + 'static,
        C: IntoCleanup,
    {
        let sources = deps.iter().map(|dep| dep.source()).collect();
        Self::build(Box::new(move || f().into_cleanup()), DepState::with_sources(sources), false)
    }

    fn build(run_fn: EffectFn, deps: DepState, auto_track: bool) -> Self {
        let inner = Arc::new(EffectInner {
            id: NodeId::next(),
            run_fn: Mutex::new(run_fn),
            cleanup: Mutex::new(None),
            deps: Mutex::new(deps),
            cancelled: AtomicBool::new(false),
            queued: AtomicBool::new(false),
            auto_track,
        });
        debug!(id = ?inner.id, auto_track, "created effect");
        EffectInner::execute(&inner);
        Effect { inner }
    }

    /// Dispose the effect now: the final cleanup runs, subscriptions detach.
    pub fn cancel(self) { drop(self) }

    /// Keep the effect running for the rest of the process without a handle.
    pub fn forget(self) {
        let inner = Arc::clone(&self.inner);
        std::mem::forget(self);
        // The leaked strong count keeps the node alive; sources only hold
        // weak back-pointers.
        std::mem::forget(inner);
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        EffectInner::dispose(&self.inner);
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("cancelled", &self.inner.cancelled.load(Ordering::Acquire))
            .finish()
    }
}

impl EffectInner {
    fn execute(inner: &Arc<Self>) {
        if inner.cancelled.load(Ordering::Acquire) {
            return;
        }
        inner.queued.store(false, Ordering::Release);

        // The previous run's teardown goes first.
        if let Some(cleanup) = inner.cleanup.lock().expect("cleanup lock poisoned").take() {
            cleanup();
        }
        if inner.cancelled.load(Ordering::Acquire) {
            // The cleanup disposed us.
            return;
        }

        if inner.auto_track {
            let (sources, guards) = {
                let mut deps = inner.deps.lock().expect("deps lock poisoned");
                (std::mem::take(&mut deps.sources), deps.guards.take())
            };
            drop(guards);
            drop(sources);
        }

        let cleanup = Self::run_callback(inner);
        *inner.cleanup.lock().expect("cleanup lock poisoned") = cleanup;

        Self::ensure_subscribed(inner);
    }

    fn run_callback(inner: &Arc<Self>) -> Option<Cleanup> {
        let mut run_fn = match inner.run_fn.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                // The queued flag coalesces normal wake-ups; contending here
                // means the callback re-entered itself.
                panic!("cycle detected: effect {:?} re-entered its own run", inner.id)
            }
        };
        if inner.auto_track {
            let observer: Arc<dyn Observer> = Arc::clone(inner) as Arc<dyn Observer>;
            CurrentObserver::with_observer(observer, || (*run_fn)())
        } else {
            CurrentObserver::untracked(|| (*run_fn)())
        }
    }

    fn ensure_subscribed(inner: &Arc<Self>) {
        let sources: Vec<SourceRef> = {
            let deps = inner.deps.lock().expect("deps lock poisoned");
            if deps.subscribed() || deps.sources.is_empty() {
                return;
            }
            deps.sources.clone()
        };
        let dependent: Weak<dyn Observer> = Arc::downgrade(&(Arc::clone(inner) as Arc<dyn Observer>));
        let guards: Vec<ListenerGuard> =
            sources.iter().map(|source| source.attach(dependent.clone())).collect();
        inner.deps.lock().expect("deps lock poisoned").guards = Some(guards);
    }

    fn dispose(inner: &Arc<Self>) {
        if inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        trace!(id = ?inner.id, "disposing effect");
        let guards = inner.deps.lock().expect("deps lock poisoned").guards.take();
        drop(guards);
        if let Some(cleanup) = inner.cleanup.lock().expect("cleanup lock poisoned").take() {
            cleanup();
        }
    }
}

impl Observer for EffectInner {
    fn observer_id(&self) -> NodeId { self.id }

    fn observe(&self, source: SourceRef) {
        self.deps.lock().expect("deps lock poisoned").record(source);
    }

    fn mark_stale(&self) {
        // Effects cache nothing; the wake-up itself carries the change.
    }

    fn source_changed(self: Arc<Self>) {
        if self.cancelled.load(Ordering::Acquire) || self.queued.load(Ordering::Acquire) {
            return;
        }
        if runtime::is_batching() {
            self.queued.store(true, Ordering::Release);
            let inner = Arc::clone(&self);
            runtime::queue_effect(move || {
                if inner.cancelled.load(Ordering::Acquire) {
                    // Cancelled while queued: skip silently.
                    return;
                }
                Self::execute(&inner);
            });
        } else {
            Self::execute(&self);
        }
    }
}
