#![forbid(unsafe_code)]

//! Host integration errors.

use stateflow_core::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HostError>;

#[derive(Debug, Error)]
pub enum HostError {
    /// No factory was registered for the requested state type.
    #[error("no state factory registered for `{type_name}`")]
    UnknownState { type_name: &'static str },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HostError {
    pub fn unknown<S: 'static>() -> Self {
        Self::UnknownState {
            type_name: std::any::type_name::<S>(),
        }
    }
}
