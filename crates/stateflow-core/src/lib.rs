#![forbid(unsafe_code)]

//! Actor-serialized state with conflated observation and projections.
//!
//! - [`StateStore`]: owns a dedicated worker thread that applies every
//!   mutation and read to the state, one request at a time.
//! - [`ObservableState`]: the latest published value plus conflated
//!   [`StateStream`] subscriptions.
//! - [`Projection`]: change-suppressed views over one to seven extracted
//!   fields.
//!
//! # Invariants
//!
//! 1. Only the worker thread touches the state; callers communicate through
//!    two unbounded queues.
//! 2. A mutation producing a value equal to the current state publishes
//!    nothing.
//! 3. Requests on one queue are served in enqueue order. There is no
//!    ordering between the mutation queue and the read queue.
//! 4. A new subscriber immediately receives the current value and nothing
//!    older.
//! 5. Handler faults never reach the caller that enqueued the request.

pub mod actor;
mod cell;
pub mod config;
pub mod error;
pub mod metrics;
pub mod observable;
pub mod projection;

pub use actor::{StateStore, StoreHandle, StoreStatus};
pub use config::{FaultPolicy, StoreConfig};
pub use error::{HandlerFault, RequestKind, Result, StoreError};
pub use metrics::{QueueDepth, QueueMetrics};
pub use observable::{ObservableState, RecvError, StateStream};
pub use projection::{Extractors, Mapped, Projection, Single};
