#![forbid(unsafe_code)]

//! Store configuration.
//!
//! [`StoreConfig`] is a plain value with builder-style setters. Every field
//! has a default that reproduces the unhardened behaviour: unbounded queues,
//! no depth alerting, and per-item fault isolation.

use std::fmt;
use std::sync::Arc;

use crate::error::HandlerFault;
use crate::metrics::QueueDepth;

/// Callback invoked on the worker thread after a handler fault.
pub type FaultHook = Arc<dyn Fn(&HandlerFault) + Send + Sync>;

/// Callback invoked when a queue crosses its depth warning threshold.
pub type DepthHook = Arc<dyn Fn(QueueDepth) + Send + Sync>;

/// What the worker does when a handler panics or returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Log and drop the failing item. State is left unchanged and the
    /// worker keeps serving both queues.
    #[default]
    Isolate,
    /// Stop on the first fault. The store is marked poisoned, observers see
    /// their streams end, and later requests are discarded.
    Poison,
}

/// Configuration for a [`StateStore`](crate::StateStore).
#[derive(Clone)]
pub struct StoreConfig {
    /// Name given to the worker thread. Default: `"stateflow-actor"`.
    pub thread_name: String,
    /// Handler fault policy. Default: [`FaultPolicy::Isolate`].
    pub fault_policy: FaultPolicy,
    /// Pending depth at which a queue is reported as growing without bound.
    /// Default: `None` (no alerting).
    pub depth_warning: Option<usize>,
    /// Hard cap on pending requests per queue. A slot is reserved before
    /// the request is sent, so concurrent callers cannot overshoot it.
    /// Requests arriving while a queue is at the cap are dropped.
    /// Default: `None` (unbounded).
    pub max_pending: Option<usize>,
    /// Optional fault observer.
    pub on_fault: Option<FaultHook>,
    /// Optional depth observer, fired on each upward threshold crossing.
    pub on_depth: Option<DepthHook>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            thread_name: "stateflow-actor".to_string(),
            fault_policy: FaultPolicy::Isolate,
            depth_warning: None,
            max_pending: None,
            on_fault: None,
            on_depth: None,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    #[must_use]
    pub fn fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.fault_policy = policy;
        self
    }

    #[must_use]
    pub fn depth_warning(mut self, threshold: usize) -> Self {
        self.depth_warning = Some(threshold);
        self
    }

    /// Bound each queue. A cap of zero is raised to one.
    #[must_use]
    pub fn max_pending(mut self, cap: usize) -> Self {
        self.max_pending = Some(cap.max(1));
        self
    }

    #[must_use]
    pub fn on_fault(mut self, hook: impl Fn(&HandlerFault) + Send + Sync + 'static) -> Self {
        self.on_fault = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_depth(mut self, hook: impl Fn(QueueDepth) + Send + Sync + 'static) -> Self {
        self.on_depth = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("thread_name", &self.thread_name)
            .field("fault_policy", &self.fault_policy)
            .field("depth_warning", &self.depth_warning)
            .field("max_pending", &self.max_pending)
            .field("on_fault", &self.on_fault.is_some())
            .field("on_depth", &self.on_depth.is_some())
            .finish()
    }
}
