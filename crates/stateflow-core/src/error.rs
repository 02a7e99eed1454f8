#![forbid(unsafe_code)]

//! Error types for store construction and handler faults.

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Failures surfaced to the code that owns a store.
///
/// Enqueue operations never fail; faults raised inside handlers are
/// reported through [`HandlerFault`] instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to spawn state worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Which queue a faulting request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Mutation,
    Read,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mutation => f.write_str("mutation"),
            Self::Read => f.write_str("read"),
        }
    }
}

/// A mutation or read handler panicked or returned an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} handler fault: {message}")]
pub struct HandlerFault {
    pub kind: RequestKind,
    pub message: String,
}

impl HandlerFault {
    #[must_use]
    pub fn new(kind: RequestKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build a fault from a `catch_unwind` payload.
    ///
    /// Panics raised with `panic!("literal")` carry a `&str`, formatted
    /// panics carry a `String`; anything else is reported opaquely.
    #[must_use]
    pub fn from_panic(kind: RequestKind, payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new(kind, message)
    }
}
