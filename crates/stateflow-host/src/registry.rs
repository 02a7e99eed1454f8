#![forbid(unsafe_code)]

//! Typed store registry.
//!
//! Maps a state type to the factory that builds its initial value, and
//! keeps at most one live store per type. Lookup is keyed by [`TypeId`],
//! so asking for a store is a compile-time choice of `S` rather than a
//! runtime class check.
//!
//! ```
//! use stateflow_host::StoreRegistry;
//!
//! #[derive(Debug, Clone, PartialEq, Default)]
//! struct Inbox { unread: u32 }
//!
//! let mut registry = StoreRegistry::new();
//! registry.register(Inbox::default);
//!
//! let inbox = registry.get_or_create::<Inbox>().unwrap();
//! assert_eq!(inbox.current().unread, 0);
//! assert!(registry.get_or_create::<String>().is_err());
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use stateflow_core::{StateStore, StoreConfig, StoreHandle};

use crate::error::{HostError, Result};

type Factory<S> = Box<dyn Fn() -> S + Send + Sync>;

struct Registration {
    type_name: &'static str,
    /// A `Factory<S>` for the keyed `S`.
    factory: Box<dyn Any + Send + Sync>,
    config: Option<StoreConfig>,
    /// A `StateStore<S>` for the keyed `S`, while one is alive.
    store: Option<Box<dyn Any + Send + Sync>>,
}

/// Registry of state factories and the stores built from them.
pub struct StoreRegistry {
    entries: HashMap<TypeId, Registration>,
    default_config: StoreConfig,
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.entries.values().map(|e| e.type_name).collect();
        types.sort_unstable();
        f.debug_struct("StoreRegistry")
            .field("registered", &types)
            .field("live", &self.live_count())
            .finish()
    }
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// A registry whose stores use `config` unless registered with their own.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            entries: HashMap::new(),
            default_config: config,
        }
    }

    /// Register the factory for `S`, replacing any earlier one.
    ///
    /// A live store for `S` keeps running; the new factory is used the next
    /// time a store has to be created.
    pub fn register<S>(&mut self, factory: impl Fn() -> S + Send + Sync + 'static)
    where
        S: PartialEq + Send + Sync + 'static,
    {
        self.insert::<S>(Box::new(factory), None);
    }

    /// Register the factory for `S` with a store configuration of its own.
    pub fn register_with_config<S>(
        &mut self,
        factory: impl Fn() -> S + Send + Sync + 'static,
        config: StoreConfig,
    ) where
        S: PartialEq + Send + Sync + 'static,
    {
        self.insert::<S>(Box::new(factory), Some(config));
    }

    fn insert<S>(&mut self, factory: Factory<S>, config: Option<StoreConfig>)
    where
        S: PartialEq + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<S>();
        let id = TypeId::of::<S>();
        let store = self.entries.remove(&id).and_then(|entry| entry.store);
        self.entries.insert(
            id,
            Registration {
                type_name,
                factory: Box::new(factory),
                config,
                store,
            },
        );
        tracing::debug!(state = type_name, "state factory registered");
    }

    /// Handle to the live store for `S`, creating it on first use.
    pub fn get_or_create<S>(&mut self) -> Result<StoreHandle<S>>
    where
        S: PartialEq + Send + Sync + 'static,
    {
        if let Some(handle) = self.handle::<S>() {
            return Ok(handle);
        }
        let default_config = &self.default_config;
        let entry = self
            .entries
            .get_mut(&TypeId::of::<S>())
            .ok_or_else(HostError::unknown::<S>)?;
        let factory = entry
            .factory
            .downcast_ref::<Factory<S>>()
            .ok_or_else(HostError::unknown::<S>)?;
        let config = entry
            .config
            .clone()
            .unwrap_or_else(|| default_config.clone());

        let store = StateStore::with_config(factory(), config)?;
        let handle = store.handle();
        entry.store = Some(Box::new(store));
        tracing::debug!(state = entry.type_name, "state store created");
        Ok(handle)
    }

    /// Handle to the live store for `S`, if one exists.
    #[must_use]
    pub fn handle<S: 'static>(&self) -> Option<StoreHandle<S>> {
        self.entries
            .get(&TypeId::of::<S>())?
            .store
            .as_ref()?
            .downcast_ref::<StateStore<S>>()
            .map(StateStore::handle)
    }

    /// Dispose the live store for `S`, keeping its factory registered.
    ///
    /// Returns whether a store was running.
    pub fn remove<S: 'static>(&mut self) -> bool {
        let Some(entry) = self.entries.get_mut(&TypeId::of::<S>()) else {
            return false;
        };
        let Some(store) = entry.store.take() else {
            return false;
        };
        drop(store);
        tracing::debug!(state = entry.type_name, "state store removed");
        true
    }

    /// Dispose the live store for `S` and forget its factory.
    pub fn unregister<S: 'static>(&mut self) -> bool {
        self.remove::<S>();
        self.entries.remove(&TypeId::of::<S>()).is_some()
    }

    /// Dispose every live store. Factories stay registered.
    pub fn dispose_all(&mut self) {
        let disposed = self
            .entries
            .values_mut()
            .filter_map(|entry| entry.store.take())
            .count();
        if disposed > 0 {
            tracing::debug!(disposed, "all state stores removed");
        }
    }

    #[must_use]
    pub fn is_registered<S: 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<S>())
    }

    #[must_use]
    pub fn is_live<S: 'static>(&self) -> bool {
        self.entries
            .get(&TypeId::of::<S>())
            .is_some_and(|entry| entry.store.is_some())
    }

    /// Number of registered state types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of stores currently running.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.values().filter(|e| e.store.is_some()).count()
    }
}
