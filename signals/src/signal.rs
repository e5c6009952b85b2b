//! Signal node types and the read traits over them.

pub mod computed;
pub mod mutable;

pub use computed::*;
pub use mutable::*;

use crate::graph::SourceRef;

/// A node that can appear in a sources list: something a derivation can
/// depend on. Implemented by [`Signal`] and [`Computed`].
pub trait Observable {
    /// Type-erased handle used for edge bookkeeping.
    #[doc(hidden)]
    fn source(&self) -> SourceRef;
}

impl<T: Observable + ?Sized> Observable for &T {
    fn source(&self) -> SourceRef { Observable::source(*self) }
}

/// Tracked, cloning read of the current value.
pub trait Get<T: 'static>: Observable {
    fn get(&self) -> T;
}

/// Tracked, borrowing access to the current value.
///
/// The borrow is held while `f` runs; do not write the node (or, for a
/// computed, its upstream signals) from inside `f`.
pub trait With<T: 'static> {
    fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R;
}

/// Untracked read of the current value: no edge is registered even when a
/// derivation is executing.
pub trait Peek<T: 'static> {
    fn peek(&self) -> T;
}
