#![forbid(unsafe_code)]

//! The state-owner contract for host components.
//!
//! A component that owns state implements [`StateOwner::store`] and gets
//! the rest of the surface for free: enqueueing updates and reads,
//! observing the full state, and selecting change-suppressed projections.

use stateflow_core::{Extractors, Mapped, Projection, Single, StateStream, StoreHandle};

/// A host component backed by a state store.
///
/// ```
/// use stateflow_core::{StateStore, StoreHandle};
/// use stateflow_host::StateOwner;
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Cart { items: Vec<String> }
///
/// struct CartModel { store: StateStore<Cart> }
///
/// impl StateOwner for CartModel {
///     type State = Cart;
///     fn store(&self) -> &StoreHandle<Cart> {
///         &self.store
///     }
/// }
///
/// let model = CartModel { store: StateStore::new(Cart { items: vec![] }).unwrap() };
/// let mut count = model.select(|c: &Cart| c.items.len());
/// assert_eq!(count.recv(), Some(0));
/// model.set_state(|c: &Cart| {
///     let mut items = c.items.clone();
///     items.push("tea".into());
///     Cart { items }
/// });
/// assert_eq!(count.recv(), Some(1));
/// ```
pub trait StateOwner {
    type State: PartialEq + Send + Sync + 'static;

    fn store(&self) -> &StoreHandle<Self::State>;

    /// Enqueue a state transformation.
    fn set_state<F>(&self, f: F)
    where
        F: FnOnce(&Self::State) -> Self::State + Send + 'static,
    {
        self.store().update(f);
    }

    /// Enqueue a fallible transformation; an `Err` leaves the state as is.
    fn try_set_state<F, E>(&self, f: F)
    where
        F: FnOnce(&Self::State) -> Result<Self::State, E> + Send + 'static,
        E: std::fmt::Display,
    {
        self.store().try_update(f);
    }

    /// Enqueue a read of the state as of when it is served.
    fn with_state<F>(&self, f: F)
    where
        F: FnOnce(&Self::State) + Send + 'static,
    {
        self.store().read(f);
    }

    /// Every distinct state, starting with the current one.
    fn state_stream(&self) -> StateStream<Self::State> {
        self.store().observe()
    }

    /// Every distinct state mapped through `map`, without suppressing
    /// repeated outputs.
    fn map_state<F, T>(&self, map: F) -> Mapped<Self::State, F>
    where
        F: Fn(&Self::State) -> T,
    {
        self.store().map(map)
    }

    /// One field of the state, emitted only when it changes.
    fn select<F, A>(&self, extraction: F) -> Projection<Self::State, Single<F>>
    where
        F: Fn(&Self::State) -> A + Send + 'static,
        A: PartialEq + Clone + Send + 'static,
    {
        self.store().project(extraction)
    }

    /// Up to seven fields of the state, emitted together whenever any of
    /// them changes.
    fn select_many<E>(&self, extractors: E) -> Projection<Self::State, E>
    where
        E: Extractors<Self::State>,
    {
        self.store().project_many(extractors)
    }
}
