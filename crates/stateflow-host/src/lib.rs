#![forbid(unsafe_code)]

//! Host integration for stateflow stores.
//!
//! - [`HostScope`]: creates a store when its host starts and disposes it
//!   when the host stops.
//! - [`StateOwner`]: the surface a state-owning component exposes, built on
//!   one required accessor.
//! - [`StoreRegistry`]: one store per state type, created on demand from a
//!   registered factory.

pub mod error;
pub mod lifecycle;
pub mod owner;
pub mod registry;

pub use error::{HostError, Result};
pub use lifecycle::{HostScope, Lifecycle};
pub use owner::StateOwner;
pub use registry::StoreRegistry;
