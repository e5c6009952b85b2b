//! Node identity and the dependency-graph vocabulary shared by computeds and
//! effects.
//!
//! Edges are stored twice: every dependent keeps an ordered list of the
//! sources its last run read, and every source keeps a listener entry with a
//! weak back-pointer to the dependent. The weak direction keeps the graph
//! free of retain cycles while `SourceRef` (strong, upward) pins sources for
//! as long as something derives from them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::listeners::ListenerGuard;

/// Stable identity of a graph node, used for edge dedup and as the key of
/// pending-notification records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A dependent node (computed or effect) as the engine sees it.
///
/// Tracked reads forward the sources they touch through [`observe`];
/// sources wake their dependents through [`source_changed`].
///
/// [`observe`]: Observer::observe
/// [`source_changed`]: Observer::source_changed
pub(crate) trait Observer: Send + Sync + 'static {
    fn observer_id(&self) -> NodeId;

    /// A tracked read registered `source` while this observer was current.
    fn observe(&self, source: SourceRef);

    /// Fast structural pass on a write: dependents that cache a value mark
    /// themselves stale without recomputing.
    fn mark_stale(&self);

    /// A source this node subscribed to changed.
    fn source_changed(self: Arc<Self>);
}

/// Type-erased handle to a node that can appear in a sources list.
#[derive(Clone)]
pub struct SourceRef(pub(crate) Arc<dyn ErasedSource>);

impl SourceRef {
    pub(crate) fn id(&self) -> NodeId { self.0.source_id() }

    pub(crate) fn attach(&self, dependent: Weak<dyn Observer>) -> ListenerGuard {
        self.0.attach_dependent(dependent)
    }
}

impl std::fmt::Debug for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SourceRef").field(&self.id()).finish()
    }
}

/// Implemented by the inner node types; mediates dependent-edge creation.
pub(crate) trait ErasedSource: Send + Sync {
    fn source_id(&self) -> NodeId;
    fn attach_dependent(&self, dependent: Weak<dyn Observer>) -> ListenerGuard;
}

/// Sources of a computed or effect, in the order the last run read them.
pub(crate) struct DepState {
    pub sources: Vec<SourceRef>,
    /// One guard per source, present iff the node is subscribed to them.
    pub guards: Option<Vec<ListenerGuard>>,
    /// Consecutive runs that produced an identical source list.
    pub stable_runs: u32,
}

impl DepState {
    pub fn new() -> Self {
        Self { sources: Vec::new(), guards: None, stable_runs: 0 }
    }

    pub fn with_sources(sources: Vec<SourceRef>) -> Self {
        Self { sources, guards: None, stable_runs: 0 }
    }

    /// Record a source read during the current run, skipping duplicates.
    pub fn record(&mut self, source: SourceRef) {
        if self.sources.iter().any(|s| s.id() == source.id()) {
            return;
        }
        self.sources.push(source);
    }

    pub fn subscribed(&self) -> bool { self.guards.is_some() }

    pub fn ids(&self) -> Vec<NodeId> { self.sources.iter().map(|s| s.id()).collect() }
}
