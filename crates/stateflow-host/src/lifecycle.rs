#![forbid(unsafe_code)]

//! Lifecycle-bound store ownership.
//!
//! A host component (screen, session, window) signals [`Lifecycle::Start`]
//! when it becomes active and [`Lifecycle::Stop`] when it is torn down.
//! [`HostScope`] turns those signals into store creation and disposal.
//!
//! # Invariants
//!
//! 1. At most one store is alive per scope.
//! 2. `Start` on an active scope is a no-op; the running store keeps its
//!    state.
//! 3. `Stop` disposes the store. Pending requests are discarded and
//!    observers see their streams end.
//! 4. A `Start` after `Stop` builds a fresh store from the factory, so
//!    state does not survive a restart.

use std::fmt;

use stateflow_core::{StateStore, StoreConfig, StoreHandle};

use crate::error::Result;

/// Signals a host sends to a [`HostScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Start,
    Stop,
}

type Factory<S> = Box<dyn Fn() -> S + Send + Sync>;

/// Owns a store for as long as its host is active.
pub struct HostScope<S> {
    factory: Factory<S>,
    config: StoreConfig,
    store: Option<StateStore<S>>,
    generation: u64,
}

impl<S: fmt::Debug> fmt::Debug for HostScope<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostScope")
            .field("active", &self.store.is_some())
            .field("generation", &self.generation)
            .field("store", &self.store)
            .finish()
    }
}

impl<S> HostScope<S>
where
    S: PartialEq + Send + Sync + 'static,
{
    /// A stopped scope that builds its initial state with `factory`.
    pub fn new(factory: impl Fn() -> S + Send + Sync + 'static) -> Self {
        Self::with_config(factory, StoreConfig::default())
    }

    pub fn with_config(
        factory: impl Fn() -> S + Send + Sync + 'static,
        config: StoreConfig,
    ) -> Self {
        Self {
            factory: Box::new(factory),
            config,
            store: None,
            generation: 0,
        }
    }

    /// Apply a lifecycle signal.
    pub fn signal(&mut self, signal: Lifecycle) -> Result<()> {
        match signal {
            Lifecycle::Start => self.start().map(|_| ()),
            Lifecycle::Stop => {
                self.stop();
                Ok(())
            }
        }
    }

    /// Create the store if the scope is not already active.
    pub fn start(&mut self) -> Result<StoreHandle<S>> {
        if let Some(store) = &self.store {
            return Ok(store.handle());
        }
        let store = StateStore::with_config((self.factory)(), self.config.clone())?;
        self.generation += 1;
        tracing::debug!(
            state = std::any::type_name::<S>(),
            generation = self.generation,
            "host scope started"
        );
        let handle = store.handle();
        self.store = Some(store);
        Ok(handle)
    }
}

impl<S> HostScope<S> {
    /// Dispose the store, if any. Returns whether a store was running.
    pub fn stop(&mut self) -> bool {
        let Some(store) = self.store.take() else {
            return false;
        };
        store.dispose();
        tracing::debug!(generation = self.generation, "host scope stopped");
        true
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.store.is_some()
    }

    /// Number of stores this scope has created so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn store(&self) -> Option<&StateStore<S>> {
        self.store.as_ref()
    }

    #[must_use]
    pub fn handle(&self) -> Option<StoreHandle<S>> {
        self.store.as_ref().map(StateStore::handle)
    }
}
