#![forbid(unsafe_code)]

//! The single owned copy of a store's state.

use std::sync::Arc;

/// Exclusive owner of the current state value.
///
/// Lives on the worker thread and is never shared. The value itself is
/// immutable; replacing it swaps in a new `Arc`, and the previous snapshot
/// stays valid for anyone still holding it.
#[derive(Debug)]
pub(crate) struct StateCell<S> {
    value: Arc<S>,
}

impl<S: PartialEq> StateCell<S> {
    pub(crate) fn new(value: Arc<S>) -> Self {
        Self { value }
    }

    pub(crate) fn get(&self) -> &S {
        &self.value
    }

    /// Store `candidate` if it differs from the current value.
    ///
    /// Returns the new snapshot to publish, or `None` for a no-op update.
    pub(crate) fn replace(&mut self, candidate: S) -> Option<Arc<S>> {
        if *self.value == candidate {
            return None;
        }
        self.value = Arc::new(candidate);
        Some(Arc::clone(&self.value))
    }
}
