//! Cached derivations.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, TryLockError, Weak};

use tracing::{debug, trace};

use crate::context::CurrentObserver;
use crate::graph::{DepState, ErasedSource, NodeId, Observer, SourceRef};
use crate::listeners::{ListenerGuard, ListenerSet};
use crate::porcelain::{IntoSubscribeListener, Subscribe, SubscriptionGuard};
use crate::runtime;
use crate::same::Same;
use crate::signal::{Get, Observable, Peek, With};

/// Consecutive identical source lists after which a source change takes the
/// equality-probe path instead of a full re-tracking recompute.
pub(crate) const STABLE_DEPS_THRESHOLD: u32 = 2;

type ComputeFn<T> = Box<dyn FnMut() -> T + Send>;

/// Cached derivation over other signals and computeds.
///
/// The calculation runs lazily: creation computes nothing, a read of a stale
/// computed recomputes before returning. Dependencies are discovered on every
/// run, so a calculation that branches re-tracks itself as its branches
/// change. Recomputing to a value that is [`Same`] as the previous one does
/// not notify downstream.
///
/// ```
/// use ripple_signals::{Computed, Get, Signal};
///
/// let count = Signal::new(2);
/// let doubled = Computed::new({
///     let count = count.clone();
///     move || count.get() * 2
/// });
/// assert_eq!(doubled.get(), 4);
///
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T>(Arc<ComputedInner<T>>);

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self { Self(Arc::clone(&self.0)) }
}

pub(crate) struct ComputedInner<T> {
    id: NodeId,
    compute: Mutex<ComputeFn<T>>,
    /// `None` until the first successful run.
    value: RwLock<Option<T>>,
    dirty: AtomicBool,
    deps: Mutex<DepState>,
    listeners: ListenerSet<T>,
    auto_track: bool,
}

impl<T: Same + Clone + Send + Sync + 'static> Computed<T> {
    /// Create a derivation that tracks whatever it reads.
    pub fn new<F>(compute: F) -> Self
    where F: FnMut() -> T + Send + 'static {
        Self::build(Box::new(compute), DepState::new(), true)
    }

    /// Create a derivation with a fixed dependency list. Reads inside
    /// `compute` register nothing; only changes to `deps` re-run it.
    pub fn with_deps<F>(compute: F, deps: &[&dyn Observable]) -> Self
    where F: FnMut() -> T + Send + 'static {
        let sources = deps.iter().map(|dep| dep.source()).collect();
        Self::build(Box::new(compute), DepState::with_sources(sources), false)
    }

    fn build(compute: ComputeFn<T>, deps: DepState, auto_track: bool) -> Self {
        let inner = Arc::new(ComputedInner {
            id: NodeId::next(),
            compute: Mutex::new(compute),
            value: RwLock::new(None),
            dirty: AtomicBool::new(true),
            deps: Mutex::new(deps),
            listeners: ListenerSet::new(),
            auto_track,
        });
        debug!(id = ?inner.id, auto_track, "created computed");
        Self(inner)
    }

    /// Whether the cached value may be stale. A dirty computed recomputes on
    /// its next read.
    pub fn is_dirty(&self) -> bool { self.0.dirty.load(Ordering::Acquire) }
}

impl<T: Same + Clone + Send + Sync + 'static> ComputedInner<T> {
    /// Recompute if stale.
    fn ensure_fresh(inner: &Arc<Self>) {
        if inner.dirty.load(Ordering::Acquire) {
            Self::recompute(inner, true);
        }
    }

    /// Attach source listeners if the node has sources but no guards yet.
    fn ensure_subscribed(inner: &Arc<Self>) {
        let needed = {
            let deps = inner.deps.lock().expect("deps lock poisoned");
            !deps.subscribed() && !deps.sources.is_empty()
        };
        if needed {
            Self::resubscribe(inner);
        }
    }

    fn resubscribe(inner: &Arc<Self>) {
        let sources: Vec<SourceRef> =
            inner.deps.lock().expect("deps lock poisoned").sources.clone();
        let dependent: Weak<dyn Observer> = Arc::downgrade(&(Arc::clone(inner) as Arc<dyn Observer>));
        let guards: Vec<ListenerGuard> =
            sources.iter().map(|source| source.attach(dependent.clone())).collect();
        inner.deps.lock().expect("deps lock poisoned").guards = Some(guards);
    }

    /// Full recompute. With `notify` false this is the silent refresh used
    /// at subscribe time: the value and dependency set are primed but no
    /// listener hears about it.
    fn recompute(inner: &Arc<Self>, notify: bool) {
        // Detach and clear so the run rebuilds the source list from scratch.
        let (old_ids, was_subscribed) = if inner.auto_track {
            let (sources, guards) = {
                let mut deps = inner.deps.lock().expect("deps lock poisoned");
                (std::mem::take(&mut deps.sources), deps.guards.take())
            };
            let was_subscribed = guards.is_some();
            // Guards drop with no engine lock held; each removes one edge.
            drop(guards);
            (sources.iter().map(|source| source.id()).collect::<Vec<_>>(), was_subscribed)
        } else {
            (Vec::new(), false)
        };
        let first_run = inner.value.read().expect("value lock poisoned").is_none();

        let new = Self::run_thunk(inner);

        // Cleared only after the thunk returns: a panicking calculation
        // leaves the node dirty and the next read retries.
        inner.dirty.store(false, Ordering::Release);
        trace!(id = ?inner.id, first_run, "recomputed");

        if inner.auto_track {
            {
                let mut deps = inner.deps.lock().expect("deps lock poisoned");
                if was_subscribed {
                    if deps.ids() == old_ids {
                        deps.stable_runs += 1;
                    } else {
                        deps.stable_runs = 0;
                    }
                }
            }
            if was_subscribed {
                Self::resubscribe(inner);
            }
        }

        let old = {
            let mut slot = inner.value.write().expect("value lock poisoned");
            if let Some(current) = slot.as_ref()
                && current.same(&new)
            {
                // Unchanged: downstream stays quiet.
                return;
            }
            slot.replace(new)
        };
        debug_assert!(!(first_run && old.is_some()));

        if !notify || inner.listeners.is_empty() {
            return;
        }
        let strong = Arc::clone(inner);
        runtime::dispatch_notification(inner.id, move || {
            Self::notify_listeners(&strong, old.as_ref());
        });
    }

    /// Equality probe for dependency-stable computeds: runs the calculation
    /// untracked and skips the detach/re-track entirely when the value comes
    /// out unchanged. A changed value means the untracked run cannot be
    /// trusted with the dependency list, so it is discarded and the full
    /// re-tracking recompute stores, re-subscribes, and notifies.
    fn refresh_stable(inner: &Arc<Self>) {
        let probed = {
            let mut compute = Self::lock_compute(inner);
            CurrentObserver::untracked(|| (*compute)())
        };

        let unchanged = {
            let slot = inner.value.read().expect("value lock poisoned");
            matches!(slot.as_ref(), Some(current) if current.same(&probed))
        };
        if unchanged {
            inner.dirty.store(false, Ordering::Release);
            return;
        }
        trace!(id = ?inner.id, "stable-deps probe found a changed value");

        Self::recompute(inner, true);
    }

    /// Run the calculation under the tracker (or untracked for fixed deps).
    fn run_thunk(inner: &Arc<Self>) -> T {
        let mut compute = Self::lock_compute(inner);
        if inner.auto_track {
            let observer: Arc<dyn Observer> = Arc::clone(inner) as Arc<dyn Observer>;
            CurrentObserver::with_observer(observer, || (*compute)())
        } else {
            CurrentObserver::untracked(|| (*compute)())
        }
    }

    fn lock_compute(inner: &Arc<Self>) -> std::sync::MutexGuard<'_, ComputeFn<T>> {
        match inner.compute.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                // The only way to contend on a single thread is re-entry.
                panic!("cycle detected: computed {:?} reads itself, directly or transitively", inner.id)
            }
        }
    }

    fn notify_listeners(inner: &Arc<Self>, old: Option<&T>) {
        let new = inner.value.read().expect("value lock poisoned").clone();
        let Some(new) = new else { return };
        inner.listeners.notify(&new, old);
    }

    /// Last subscriber gone: drop source subscriptions and go lazy. The
    /// dirty mark makes the next read rebuild from current source values.
    fn suspend(inner: &Arc<Self>) {
        let guards = inner.deps.lock().expect("deps lock poisoned").guards.take();
        drop(guards);
        inner.dirty.store(true, Ordering::Release);
        trace!(id = ?inner.id, "suspended");
    }
}

impl<T: Same + Clone + Send + Sync + 'static> Observer for ComputedInner<T> {
    fn observer_id(&self) -> NodeId { self.id }

    fn observe(&self, source: SourceRef) {
        self.deps.lock().expect("deps lock poisoned").record(source);
    }

    fn mark_stale(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn source_changed(self: Arc<Self>) {
        self.dirty.store(true, Ordering::Release);
        if self.listeners.is_empty() {
            // Nothing downstream: stay lazy until read.
            return;
        }
        let stable =
            self.deps.lock().expect("deps lock poisoned").stable_runs >= STABLE_DEPS_THRESHOLD;
        if self.auto_track && stable {
            Self::refresh_stable(&self);
        } else {
            Self::recompute(&self, true);
        }
    }
}

impl<T: Send + Sync + 'static> ErasedSource for ComputedInner<T> {
    fn source_id(&self) -> NodeId { self.id }

    fn attach_dependent(&self, dependent: Weak<dyn Observer>) -> ListenerGuard {
        self.listeners.attach_dependent(dependent)
    }
}

impl<T: Send + Sync + 'static> Observable for Computed<T> {
    fn source(&self) -> SourceRef { SourceRef(Arc::clone(&self.0) as Arc<dyn ErasedSource>) }
}

impl<T: Same + Clone + Send + Sync + 'static> Get<T> for Computed<T> {
    fn get(&self) -> T {
        CurrentObserver::track(self);
        ComputedInner::ensure_fresh(&self.0);
        ComputedInner::ensure_subscribed(&self.0);
        self.0
            .value
            .read()
            .expect("value lock poisoned")
            .clone()
            .expect("computed value present after refresh")
    }
}

impl<T: Same + Clone + Send + Sync + 'static> With<T> for Computed<T> {
    fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        CurrentObserver::track(self);
        ComputedInner::ensure_fresh(&self.0);
        ComputedInner::ensure_subscribed(&self.0);
        let guard = self.0.value.read().expect("value lock poisoned");
        f(guard.as_ref().expect("computed value present after refresh"))
    }
}

impl<T: Same + Clone + Send + Sync + 'static> Peek<T> for Computed<T> {
    fn peek(&self) -> T {
        CurrentObserver::untracked(|| {
            ComputedInner::ensure_fresh(&self.0);
            ComputedInner::ensure_subscribed(&self.0);
            self.0
                .value
                .read()
                .expect("value lock poisoned")
                .clone()
                .expect("computed value present after refresh")
        })
    }
}

impl<T: Same + Clone + Send + Sync + 'static> Subscribe<T> for Computed<T> {
    fn subscribe<F>(&self, listener: F) -> SubscriptionGuard
    where F: IntoSubscribeListener<T> {
        let guard = self.0.listeners.attach_callback(listener.into_subscribe_listener());
        if self.0.dirty.load(Ordering::Acquire) && !runtime::is_batching() {
            // Prime the value and dependency set without telling anyone.
            ComputedInner::recompute(&self.0, false);
        }
        ComputedInner::ensure_subscribed(&self.0);

        let weak = Arc::downgrade(&self.0);
        SubscriptionGuard::with_hook(guard, move || {
            if let Some(inner) = weak.upgrade()
                && inner.listeners.is_empty()
            {
                ComputedInner::suspend(&inner);
            }
        })
    }
}

impl<T> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.0.id)
            .field("dirty", &self.0.dirty.load(Ordering::Acquire))
            .finish()
    }
}
