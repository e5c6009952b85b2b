//! Subscribing callbacks to nodes.

use std::sync::Arc;

use crate::listeners::{ListenerGuard, SubscribeListener};

/// Subscribing to a node. Listeners fire on subsequent changes only, never
/// with the current value at subscription time, and receive `(new, old)`.
/// `old` is `None` only on the first notification of a derivation that had
/// never computed before.
pub trait Subscribe<T: 'static> {
    fn subscribe<F>(&self, listener: F) -> SubscriptionGuard
    where F: IntoSubscribeListener<T>;
}

/// Conversion into the `(new, old)` listener shape.
pub trait IntoSubscribeListener<T> {
    fn into_subscribe_listener(self) -> SubscribeListener<T>;
}

impl<F, T> IntoSubscribeListener<T> for F
where F: Fn(&T, Option<&T>) + Send + Sync + 'static
{
    fn into_subscribe_listener(self) -> SubscribeListener<T> { Arc::new(self) }
}

// Channel senders receive a clone of the new value.
impl<T: Clone + Send + 'static> IntoSubscribeListener<T> for std::sync::mpsc::Sender<T> {
    fn into_subscribe_listener(self) -> SubscribeListener<T> {
        Arc::new(move |new: &T, _old: Option<&T>| {
            let _ = self.send(new.clone());
        })
    }
}

#[cfg(feature = "tokio")]
impl<T: Clone + Send + 'static> IntoSubscribeListener<T> for tokio::sync::mpsc::UnboundedSender<T> {
    fn into_subscribe_listener(self) -> SubscribeListener<T> {
        Arc::new(move |new: &T, _old: Option<&T>| {
            let _ = self.send(new.clone());
        })
    }
}

/// RAII handle for a subscription; dropping it (or calling
/// [`unsubscribe`](SubscriptionGuard::unsubscribe)) removes the listener.
/// Removal is idempotent.
pub struct SubscriptionGuard {
    guard: Option<ListenerGuard>,
    on_unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    pub(crate) fn new(guard: ListenerGuard) -> Self {
        Self { guard: Some(guard), on_unsubscribe: None }
    }

    pub(crate) fn with_hook(guard: ListenerGuard, hook: impl FnOnce() + Send + 'static) -> Self {
        Self { guard: Some(guard), on_unsubscribe: Some(Box::new(hook)) }
    }

    /// Consume the guard and detach now.
    pub fn unsubscribe(self) {}
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        // The entry must be gone before the hook inspects the listener list.
        self.guard.take();
        if let Some(hook) = self.on_unsubscribe.take() {
            hook();
        }
    }
}
