#![forbid(unsafe_code)]

//! Queue depth and throughput counters.
//!
//! Both request queues are unbounded unless a cap is configured, so a host
//! that enqueues faster than the worker drains will grow memory without
//! limit. These counters make that visible: pending depth is
//! `enqueued - dequeued` per queue, and an optional threshold fires a
//! warning (plus hook) each time a queue climbs past it.
//!
//! # Invariants
//!
//! 1. Counters are monotonic.
//! 2. `dequeued <= enqueued` for each queue (dropped requests are counted
//!    in neither).
//! 3. The depth alert re-arms only after the queue falls back below its
//!    threshold.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::RequestKind;

/// Depth report handed to a depth hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDepth {
    pub kind: RequestKind,
    pub pending: usize,
    pub threshold: usize,
}

/// Point-in-time copy of a store's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueMetrics {
    pub mutations_enqueued: u64,
    pub mutations_dequeued: u64,
    /// Mutations whose result equalled the current state.
    pub mutations_suppressed: u64,
    /// Mutations rejected at enqueue (cap reached or store stopped).
    pub mutations_dropped: u64,
    pub reads_enqueued: u64,
    pub reads_dequeued: u64,
    pub reads_dropped: u64,
    pub faults: u64,
    /// Number of distinct states published after the initial value.
    pub publications: u64,
}

impl QueueMetrics {
    #[must_use]
    pub fn pending_mutations(&self) -> u64 {
        self.mutations_enqueued.saturating_sub(self.mutations_dequeued)
    }

    #[must_use]
    pub fn pending_reads(&self) -> u64 {
        self.reads_enqueued.saturating_sub(self.reads_dequeued)
    }
}

#[derive(Debug, Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    dropped: AtomicU64,
    alerted: AtomicBool,
}

impl QueueCounters {
    fn pending(&self) -> usize {
        let enq = self.enqueued.load(Ordering::Acquire);
        let deq = self.dequeued.load(Ordering::Acquire);
        enq.saturating_sub(deq) as usize
    }
}

/// Shared counters, updated by enqueuing threads and the worker.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    mutations: QueueCounters,
    reads: QueueCounters,
    suppressed: AtomicU64,
    faults: AtomicU64,
    publications: AtomicU64,
}

impl Counters {
    fn queue(&self, kind: RequestKind) -> &QueueCounters {
        match kind {
            RequestKind::Mutation => &self.mutations,
            RequestKind::Read => &self.reads,
        }
    }

    pub(crate) fn pending(&self, kind: RequestKind) -> usize {
        self.queue(kind).pending()
    }

    /// Record a successful enqueue and return the new pending depth.
    pub(crate) fn record_enqueue(&self, kind: RequestKind) -> usize {
        let queue = self.queue(kind);
        queue.enqueued.fetch_add(1, Ordering::AcqRel);
        queue.pending()
    }

    /// Reserve a queue slot before sending, keeping at most `cap` requests
    /// pending. Returns the pending depth including the reservation, or
    /// `None` when the queue is full.
    pub(crate) fn reserve(&self, kind: RequestKind, cap: Option<usize>) -> Option<usize> {
        let Some(cap) = cap else {
            return Some(self.record_enqueue(kind));
        };
        let queue = self.queue(kind);
        // A stale `dequeued` only overstates the depth, so the cap holds.
        queue
            .enqueued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |enq| {
                let deq = queue.dequeued.load(Ordering::Acquire);
                (enq.saturating_sub(deq) < cap as u64).then_some(enq + 1)
            })
            .ok()?;
        Some(queue.pending())
    }

    /// Give back a reservation whose send failed.
    pub(crate) fn release(&self, kind: RequestKind) {
        self.queue(kind).enqueued.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn record_dequeue(&self, kind: RequestKind) -> usize {
        let queue = self.queue(kind);
        queue.dequeued.fetch_add(1, Ordering::AcqRel);
        queue.pending()
    }

    pub(crate) fn record_drop(&self, kind: RequestKind) {
        self.queue(kind).dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_publication(&self) {
        self.publications.fetch_add(1, Ordering::Relaxed);
    }

    /// Arm the depth alert. Returns `true` only for the call that crosses
    /// `threshold` while the alert is disarmed.
    pub(crate) fn try_alert(&self, kind: RequestKind, depth: usize, threshold: usize) -> bool {
        depth >= threshold && !self.queue(kind).alerted.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn rearm(&self, kind: RequestKind, depth: usize, threshold: usize) {
        if depth < threshold {
            self.queue(kind).alerted.store(false, Ordering::Release);
        }
    }

    pub(crate) fn snapshot(&self) -> QueueMetrics {
        QueueMetrics {
            mutations_enqueued: self.mutations.enqueued.load(Ordering::Acquire),
            mutations_dequeued: self.mutations.dequeued.load(Ordering::Acquire),
            mutations_suppressed: self.suppressed.load(Ordering::Relaxed),
            mutations_dropped: self.mutations.dropped.load(Ordering::Relaxed),
            reads_enqueued: self.reads.enqueued.load(Ordering::Acquire),
            reads_dequeued: self.reads.dequeued.load(Ordering::Acquire),
            reads_dropped: self.reads.dropped.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            publications: self.publications.load(Ordering::Relaxed),
        }
    }
}
