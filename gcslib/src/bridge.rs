//! Blocking wrappers over callback-based operations
//!
//! A blocking call hands a `Resolver` to the asynchronous operation and
//! parks on a condition variable until the resolver fires. If the resolver
//! is dropped unfired, for instance because the dispatch context has shut
//! down and discarded the request, it resolves with a fallback value.
//!
//! Never block from inside a callback running on the dispatch context: the
//! value it waits for can only be produced by that same context.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

struct CondPair<T> {
    lock: Mutex<Option<T>>,
    cvar: Condvar,
}

/// One-shot completion handle for a blocked caller
pub struct Resolver<T> {
    pair: Arc<CondPair<T>>,
    fallback: Option<T>,
}

impl<T> Resolver<T> {
    pub fn resolve(mut self, value: T) {
        self.fallback = None;
        self.fill(value);
    }

    fn fill(&self, value: T) {
        let mut slot = self.pair.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(value);
        }
        self.pair.cvar.notify_all();
    }
}

impl<T> Drop for Resolver<T> {
    fn drop(&mut self) {
        if let Some(value) = self.fallback.take() {
            self.fill(value);
        }
    }
}

/// Start an operation and block until it completes
///
/// `start` receives the resolver and must pass it to whatever eventually
/// completes the operation. `fallback` is returned if the resolver is
/// dropped without being used.
pub fn wait_for<T, F>(fallback: T, start: F) -> T
where
    F: FnOnce(Resolver<T>),
{
    let pair = Arc::new(CondPair {
        lock: Mutex::new(None),
        cvar: Condvar::new(),
    });
    start(Resolver {
        pair: pair.clone(),
        fallback: Some(fallback),
    });

    let mut slot = pair.lock.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        if let Some(value) = slot.take() {
            return value;
        }
        slot = pair.cvar.wait(slot).unwrap_or_else(PoisonError::into_inner);
    }
}
