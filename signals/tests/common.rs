use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Collects `(new, old)` pairs from a subscription; `check()` drains them.
#[allow(unused)]
pub fn change_watcher<T: Clone + Send + Sync + 'static>() -> (
    Box<dyn Fn(&T, Option<&T>) + Send + Sync>,
    Box<dyn Fn() -> Vec<(T, Option<T>)> + Send + Sync>,
) {
    let changes = Arc::new(Mutex::new(Vec::new()));
    let watcher = {
        let changes = changes.clone();
        Box::new(move |new: &T, old: Option<&T>| {
            changes.lock().unwrap().push((new.clone(), old.cloned()));
        })
    };
    let check = Box::new(move || changes.lock().unwrap().drain(..).collect::<Vec<_>>());
    (watcher, check)
}

/// A counter and a closure that bumps it; handy for run counts.
#[allow(unused)]
pub fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + Clone + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let bump = {
        let count = count.clone();
        move || {
            count.fetch_add(1, Ordering::SeqCst);
        }
    };
    (count, bump)
}

/// Small deterministic generator for the randomized graph test.
#[allow(unused)]
pub struct Lcg(pub u64);

#[allow(unused)]
impl Lcg {
    pub fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    pub fn below(&mut self, bound: u64) -> u64 { self.next() % bound }
}
