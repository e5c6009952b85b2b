/*!
Fine-grained reactive signals: mutable cells, cached derivations, and side
effects wired together by automatic dependency tracking.

Reads inside a [`Computed`] or [`Effect`] register the nodes they touch;
writes propagate through the dependency graph with equality-based
short-circuiting, lazy recomputation, and per-node notification coalescing
inside batches.

# Basic usage

```
use ripple_signals::{Computed, Get, Signal, Subscribe, batch};

let count = Signal::new(1);
let doubled = Computed::new({
    let count = count.clone();
    move || count.get() * 2
});
assert_eq!(doubled.get(), 2);

let _sub = doubled.subscribe(|new: &i32, old: Option<&i32>| {
    println!("doubled: {:?} -> {}", old, new);
});

batch(|| {
    count.set(3);
    count.set(4); // coalesced: the subscriber fires once, with (8, Some(2))
});
assert_eq!(doubled.get(), 8);
```

# Effects

```
use ripple_signals::{Effect, Get, Signal};

let level = Signal::new(0u32);
let effect = Effect::new({
    let level = level.clone();
    move || {
        let level = level.get();
        Some(move || println!("tearing down the run that saw {level}"))
    }
});

level.set(3); // cleanup of the previous run fires, then the callback again
drop(effect); // final cleanup fires exactly once
```
*/

mod context;
mod effect;
mod graph;
mod listeners;
mod porcelain;
mod runtime;
mod same;
mod signal;

pub use context::{CurrentObserver, untrack};
pub use effect::{Cleanup, Effect, IntoCleanup};
pub use graph::{NodeId, SourceRef};
pub use listeners::SubscribeListener;
pub use porcelain::{IntoSubscribeListener, Subscribe, SubscriptionGuard};
pub use runtime::{batch, is_batching};
pub use same::Same;
pub use signal::{Computed, Get, Observable, Peek, Signal, With};
