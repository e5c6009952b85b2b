//! Ordered listener lists and their unsubscribe handles.
//!
//! Every node owns a [`ListenerSet`]: user callbacks and dependent wake-ups
//! kept in insertion order. A notification pass iterates a snapshot taken at
//! pass start, so callbacks may rewire the graph mid-pass without corrupting
//! the iteration, and no lock is held while they run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::graph::Observer;

/// Callback listeners receive `(new, old)`; `old` is `None` only for the
/// first notification of a derivation that had never computed before.
pub type SubscribeListener<T> = Arc<dyn Fn(&T, Option<&T>) + Send + Sync>;

#[derive(Clone, Copy, PartialEq, Eq)]
struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) enum Entry<T> {
    /// Raw user callback.
    Callback(SubscribeListener<T>),
    /// Wake-up back-pointer to a dependent computed or effect.
    Dependent(Weak<dyn Observer>),
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        match self {
            Entry::Callback(cb) => Entry::Callback(cb.clone()),
            Entry::Dependent(dep) => Entry::Dependent(dep.clone()),
        }
    }
}

struct Shared<T> {
    entries: RwLock<Vec<(ListenerId, Entry<T>)>>,
}

pub(crate) struct ListenerSet<T>(Arc<Shared<T>>);

impl<T: 'static> ListenerSet<T> {
    pub fn new() -> Self {
        Self(Arc::new(Shared { entries: RwLock::new(Vec::new()) }))
    }

    pub fn attach_callback(&self, callback: SubscribeListener<T>) -> ListenerGuard {
        self.attach(Entry::Callback(callback))
    }

    pub fn attach_dependent(&self, dependent: Weak<dyn Observer>) -> ListenerGuard {
        self.attach(Entry::Dependent(dependent))
    }

    fn attach(&self, entry: Entry<T>) -> ListenerGuard {
        let id = ListenerId::next();
        self.0.entries.write().expect("listener lock poisoned").push((id, entry));

        let shared = Arc::downgrade(&self.0);
        ListenerGuard::new(move || {
            let Some(shared) = shared.upgrade() else { return };
            let mut entries = shared.entries.write().expect("listener lock poisoned");
            // Position is not significant across passes, so swap-remove.
            if let Some(pos) = entries.iter().position(|(entry_id, _)| *entry_id == id) {
                entries.swap_remove(pos);
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.entries.read().expect("listener lock poisoned").is_empty()
    }

    fn snapshot(&self) -> Vec<Entry<T>> {
        self.0
            .entries
            .read()
            .expect("listener lock poisoned")
            .iter()
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// Write-path structural pass: mark dependent computeds stale without
    /// recomputing anything.
    pub fn mark_dependents_stale(&self) {
        for entry in self.snapshot() {
            if let Entry::Dependent(dependent) = entry
                && let Some(dependent) = dependent.upgrade()
            {
                dependent.mark_stale();
            }
        }
    }

    /// One notification pass over a snapshot of the current listeners, in
    /// insertion order as of pass start.
    pub fn notify(&self, new: &T, old: Option<&T>) {
        for entry in self.snapshot() {
            match entry {
                Entry::Dependent(dependent) => {
                    if let Some(dependent) = dependent.upgrade() {
                        dependent.source_changed();
                    }
                }
                Entry::Callback(callback) => callback(new, old),
            }
        }
    }
}

/// Removes one listener entry when dropped; removing twice is a no-op.
pub(crate) struct ListenerGuard {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerGuard {
    fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self { detach: Some(Box::new(detach)) }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}
