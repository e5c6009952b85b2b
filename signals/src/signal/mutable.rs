//! Mutable reactive cells.

use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use crate::context::CurrentObserver;
use crate::graph::{ErasedSource, NodeId, Observer, SourceRef};
use crate::listeners::{ListenerGuard, ListenerSet};
use crate::porcelain::{IntoSubscribeListener, Subscribe, SubscriptionGuard};
use crate::runtime;
use crate::same::Same;
use crate::signal::{Get, Observable, Peek, With};

/// Mutable reactive cell.
///
/// Reading through [`Get::get`] or [`With::with`] inside a computed or effect
/// registers the cell as a dependency; writing through [`set`](Signal::set)
/// propagates to everything downstream. Clones share the same cell.
///
/// ```
/// use ripple_signals::{Get, Signal};
///
/// let count = Signal::new(1);
/// count.set(2);
/// assert_eq!(count.get(), 2);
/// ```
pub struct Signal<T>(pub(crate) Arc<SignalInner<T>>);

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self { Self(Arc::clone(&self.0)) }
}

pub(crate) struct SignalInner<T> {
    id: NodeId,
    value: RwLock<T>,
    listeners: ListenerSet<T>,
}

impl<T: Send + Sync + 'static> Signal<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(SignalInner {
            id: NodeId::next(),
            value: RwLock::new(value),
            listeners: ListenerSet::new(),
        }))
    }
}

impl<T: Same + Clone + Send + Sync + 'static> Signal<T> {
    /// Write a new value.
    ///
    /// Writing a value that is [`Same`] as the current one is a no-op: no
    /// dirty marking, no notifications. Otherwise dependents are marked
    /// stale and listeners are notified, immediately within a micro-batch or
    /// deferred to the close of an enclosing [`batch`](crate::batch).
    pub fn set(&self, value: T) {
        {
            let current = self.0.value.read().expect("value lock poisoned");
            if current.same(&value) {
                return;
            }
        }
        let old =
            std::mem::replace(&mut *self.0.value.write().expect("value lock poisoned"), value);

        // Dependents learn of the staleness before any listener runs.
        self.0.listeners.mark_dependents_stale();

        let inner = Arc::clone(&self.0);
        runtime::dispatch_notification(self.0.id, move || {
            SignalInner::notify(&inner, Some(&old));
        });
    }

    /// Read-modify-write through the same equality gate as [`set`](Signal::set).
    /// The read is untracked.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = {
            let current = self.0.value.read().expect("value lock poisoned");
            f(&current)
        };
        self.set(next);
    }
}

impl<T: Clone + Send + Sync + 'static> SignalInner<T> {
    /// One notification pass: dependents wake, callbacks get `(new, old)`.
    /// The value is cloned up front so no lock is held while listeners run.
    fn notify(inner: &Arc<Self>, old: Option<&T>) {
        let new = inner.value.read().expect("value lock poisoned").clone();
        inner.listeners.notify(&new, old);
    }
}

impl<T: Send + Sync + 'static> Observable for Signal<T> {
    fn source(&self) -> SourceRef { SourceRef(Arc::clone(&self.0) as Arc<dyn ErasedSource>) }
}

impl<T: Send + Sync + 'static> ErasedSource for SignalInner<T> {
    fn source_id(&self) -> NodeId { self.id }

    fn attach_dependent(&self, dependent: Weak<dyn Observer>) -> ListenerGuard {
        self.listeners.attach_dependent(dependent)
    }
}

impl<T: Clone + Send + Sync + 'static> Get<T> for Signal<T> {
    fn get(&self) -> T {
        CurrentObserver::track(self);
        self.0.value.read().expect("value lock poisoned").clone()
    }
}

impl<T: Send + Sync + 'static> With<T> for Signal<T> {
    fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        CurrentObserver::track(self);
        let guard = self.0.value.read().expect("value lock poisoned");
        f(&guard)
    }
}

impl<T: Clone + Send + Sync + 'static> Peek<T> for Signal<T> {
    fn peek(&self) -> T { self.0.value.read().expect("value lock poisoned").clone() }
}

impl<T: Clone + Send + Sync + 'static> Subscribe<T> for Signal<T> {
    fn subscribe<F>(&self, listener: F) -> SubscriptionGuard
    where F: IntoSubscribeListener<T> {
        let guard = self.0.listeners.attach_callback(listener.into_subscribe_listener());
        SubscriptionGuard::new(guard)
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.value.try_read() {
            Ok(guard) => f.debug_struct("Signal").field("id", &self.0.id).field("value", &*guard).finish(),
            Err(_) => f.debug_struct("Signal").field("id", &self.0.id).field("value", &"<locked>").finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn set_get_update() {
        let signal = Signal::new(42);
        assert_eq!(signal.get(), 42);

        signal.set(100);
        assert_eq!(signal.get(), 100);

        signal.update(|v| v * 2);
        assert_eq!(signal.get(), 200);
    }

    #[test]
    fn with_borrows_without_cloning() {
        let items = Signal::new(vec![1, 2, 3]);
        assert_eq!(items.with(|v| v.len()), 3);
    }

    #[test]
    fn same_value_write_is_silent() {
        let signal = Signal::new(5);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let _sub = signal.subscribe(move |_new: &i32, _old: Option<&i32>| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        signal.set(5);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        signal.set(6);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscriber_sees_new_and_old() {
        let signal = Signal::new(1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = signal.subscribe(move |new: &i32, old: Option<&i32>| {
            sink.lock().unwrap().push((*new, old.copied()));
        });

        signal.set(2);
        signal.set(3);
        assert_eq!(*seen.lock().unwrap(), [(2, Some(1)), (3, Some(2))]);
    }
}
