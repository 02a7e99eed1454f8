#![forbid(unsafe_code)]

//! Conflated, version-tracked broadcast of the latest state.
//!
//! # Design
//!
//! The current value lives in an [`ArcSwap`] so [`ObservableState::current`]
//! never takes a lock. Each subscriber owns a single-value slot; publishing
//! overwrites whatever the slot still holds, so a slow subscriber skips
//! intermediate values instead of holding the publisher back.
//!
//! The observable keeps only `Weak` references to slots. Dropping a
//! [`StateStream`] is the unsubscribe; dead entries are pruned during the
//! next publication.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per publication.
//! 2. A new subscriber's first item is the value current at subscription
//!    time. Nothing published earlier is replayed.
//! 3. A slot never accepts a version older than or equal to one it has
//!    already accepted, so a subscription racing a publication cannot see
//!    the same state twice.
//! 4. After [`close`](ObservableState::close), every stream yields its
//!    pending value (if any) and then ends.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use futures::Stream;
use thiserror::Error;

/// Why a non-blocking or bounded receive returned without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvError {
    #[error("no new value is pending")]
    Empty,
    #[error("no new value arrived before the deadline")]
    Timeout,
    #[error("the store has stopped publishing")]
    Closed,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Snapshot<S> {
    version: u64,
    value: Arc<S>,
}

struct Shared<S> {
    current: ArcSwap<Snapshot<S>>,
    subscribers: Mutex<Vec<Weak<Slot<S>>>>,
    closed: AtomicBool,
}

/// Read side of a store's state: latest value plus subscriptions.
///
/// Cloning yields another handle to the same broadcast.
pub struct ObservableState<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for ObservableState<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for ObservableState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snap = self.shared.current.load();
        f.debug_struct("ObservableState")
            .field("value", &snap.value)
            .field("version", &snap.version)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<S> ObservableState<S> {
    pub(crate) fn new(initial: Arc<S>) -> Self {
        Self {
            shared: Arc::new(Shared {
                current: ArcSwap::from_pointee(Snapshot {
                    version: 0,
                    value: initial,
                }),
                subscribers: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// The most recently published value.
    #[must_use]
    pub fn current(&self) -> Arc<S> {
        Arc::clone(&self.shared.current.load().value)
    }

    /// Number of publications so far. The initial value is version 0.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.shared.current.load().version
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.subscribers)
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Subscribe to the state. The stream's first item is the current value.
    #[must_use]
    pub fn subscribe(&self) -> StateStream<S> {
        let mut subscribers = lock(&self.shared.subscribers);
        let snap = self.shared.current.load_full();
        let slot = Arc::new(Slot::seeded(
            Arc::clone(&snap.value),
            snap.version,
            self.shared.closed.load(Ordering::Acquire),
        ));
        subscribers.push(Arc::downgrade(&slot));
        StateStream { slot }
    }

    /// Replace the current value and hand it to every live subscriber.
    ///
    /// Only the owning worker calls this; there is a single publisher.
    pub(crate) fn publish(&self, value: Arc<S>) -> u64 {
        let version = self.shared.current.load().version + 1;
        self.shared.current.store(Arc::new(Snapshot {
            version,
            value: Arc::clone(&value),
        }));

        let mut subscribers = lock(&self.shared.subscribers);
        subscribers.retain(|weak| match weak.upgrade() {
            Some(slot) => {
                slot.offer(&value, version);
                true
            }
            None => false,
        });
        version
    }

    /// Stop publishing. Streams drain their pending value and then end.
    pub(crate) fn close(&self) {
        let mut subscribers = lock(&self.shared.subscribers);
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for slot in subscribers.drain(..).filter_map(|weak| weak.upgrade()) {
            slot.close();
        }
    }
}

#[derive(Clone, Copy)]
enum Wait {
    Never,
    Until(Instant),
    Forever,
}

struct SlotInner<S> {
    pending: Option<Arc<S>>,
    version: u64,
    closed: bool,
    waker: Option<Waker>,
}

/// Single-value mailbox behind one subscription.
struct Slot<S> {
    inner: Mutex<SlotInner<S>>,
    ready: Condvar,
}

impl<S> Slot<S> {
    fn seeded(value: Arc<S>, version: u64, closed: bool) -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                pending: Some(value),
                version,
                closed,
                waker: None,
            }),
            ready: Condvar::new(),
        }
    }

    fn offer(&self, value: &Arc<S>, version: u64) {
        let waker = {
            let mut inner = lock(&self.inner);
            if version <= inner.version || inner.closed {
                return;
            }
            // Latest wins: an unconsumed value is overwritten.
            inner.pending = Some(Arc::clone(value));
            inner.version = version;
            inner.waker.take()
        };
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn close(&self) {
        let waker = {
            let mut inner = lock(&self.inner);
            inner.closed = true;
            inner.waker.take()
        };
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn take(&self, wait: Wait) -> Result<Arc<S>, RecvError> {
        let mut inner = lock(&self.inner);
        loop {
            if let Some(value) = inner.pending.take() {
                return Ok(value);
            }
            if inner.closed {
                return Err(RecvError::Closed);
            }
            match wait {
                Wait::Never => return Err(RecvError::Empty),
                Wait::Forever => {
                    inner = self
                        .ready
                        .wait(inner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Wait::Until(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(RecvError::Timeout);
                    }
                    inner = self
                        .ready
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    fn poll(&self, cx: &mut Context<'_>) -> Poll<Option<Arc<S>>> {
        let mut inner = lock(&self.inner);
        if let Some(value) = inner.pending.take() {
            return Poll::Ready(Some(value));
        }
        if inner.closed {
            return Poll::Ready(None);
        }
        if !matches!(&inner.waker, Some(existing) if existing.will_wake(cx.waker())) {
            inner.waker = Some(cx.waker().clone());
        }
        Poll::Pending
    }

    fn is_closed(&self) -> bool {
        let inner = lock(&self.inner);
        inner.closed && inner.pending.is_none()
    }
}

/// A conflated subscription to an [`ObservableState`].
///
/// Usable as a [`futures::Stream`] from async code or through the blocking
/// `recv*` methods from plain threads. Dropping it unsubscribes.
pub struct StateStream<S> {
    slot: Arc<Slot<S>>,
}

impl<S> fmt::Debug for StateStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStream")
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl<S> StateStream<S> {
    /// Block until a new value arrives. `None` once the store has stopped
    /// and the last pending value was consumed.
    pub fn recv(&mut self) -> Option<Arc<S>> {
        self.slot.take(Wait::Forever).ok()
    }

    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Arc<S>, RecvError> {
        self.recv_deadline(Instant::now() + timeout)
    }

    pub fn recv_deadline(&mut self, deadline: Instant) -> Result<Arc<S>, RecvError> {
        self.slot.take(Wait::Until(deadline))
    }

    pub fn try_recv(&mut self) -> Result<Arc<S>, RecvError> {
        self.slot.take(Wait::Never)
    }

    /// `true` once the store has stopped and nothing is left to read.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.slot.is_closed()
    }
}

impl<S> Stream for StateStream<S> {
    type Item = Arc<S>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.slot.poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use futures::executor::block_on;

    #[test]
    fn current_and_version_track_publications() {
        let obs = ObservableState::new(Arc::new(1));
        assert_eq!(*obs.current(), 1);
        assert_eq!(obs.version(), 0);

        assert_eq!(obs.publish(Arc::new(2)), 1);
        assert_eq!(obs.publish(Arc::new(3)), 2);
        assert_eq!(*obs.current(), 3);
        assert_eq!(obs.version(), 2);
    }

    #[test]
    fn subscriber_starts_with_current_value() {
        let obs = ObservableState::new(Arc::new("a"));
        obs.publish(Arc::new("b"));
        obs.publish(Arc::new("c"));

        let mut stream = obs.subscribe();
        assert_eq!(*stream.try_recv().unwrap(), "c");
        assert_eq!(stream.try_recv(), Err(RecvError::Empty));
    }

    #[test]
    fn slow_subscriber_is_conflated() {
        let obs = ObservableState::new(Arc::new(0));
        let mut stream = obs.subscribe();
        assert_eq!(*stream.try_recv().unwrap(), 0);

        for i in 1..=10 {
            obs.publish(Arc::new(i));
        }
        assert_eq!(*stream.try_recv().unwrap(), 10);
        assert_eq!(stream.try_recv(), Err(RecvError::Empty));
    }

    #[test]
    fn stale_versions_are_ignored() {
        let slot = Slot::seeded(Arc::new(5), 3, false);
        assert_eq!(*slot.take(Wait::Never).unwrap(), 5);
        slot.offer(&Arc::new(4), 3);
        slot.offer(&Arc::new(2), 1);
        assert_eq!(slot.take(Wait::Never), Err(RecvError::Empty));
        slot.offer(&Arc::new(6), 4);
        assert_eq!(*slot.take(Wait::Never).unwrap(), 6);
    }

    #[test]
    fn dropping_stream_unsubscribes() {
        let obs = ObservableState::new(Arc::new(0));
        let a = obs.subscribe();
        let b = obs.subscribe();
        assert_eq!(obs.subscriber_count(), 2);

        drop(a);
        assert_eq!(obs.subscriber_count(), 1);
        obs.publish(Arc::new(1));
        assert_eq!(lock(&obs.shared.subscribers).len(), 1);
        drop(b);
        assert_eq!(obs.subscriber_count(), 0);
    }

    #[test]
    fn close_drains_then_ends() {
        let obs = ObservableState::new(Arc::new(0));
        let mut stream = obs.subscribe();
        obs.publish(Arc::new(7));
        obs.close();

        assert!(obs.is_closed());
        assert!(!stream.is_terminated());
        assert_eq!(*stream.recv().unwrap(), 7);
        assert!(stream.recv().is_none());
        assert!(stream.is_terminated());
        assert_eq!(stream.try_recv(), Err(RecvError::Closed));
    }

    #[test]
    fn subscribing_after_close_yields_last_value_then_ends() {
        let obs = ObservableState::new(Arc::new(0));
        obs.publish(Arc::new(9));
        obs.close();

        let mut stream = obs.subscribe();
        assert_eq!(*stream.recv().unwrap(), 9);
        assert!(stream.recv().is_none());
    }

    #[test]
    fn recv_timeout_expires_without_publication() {
        let obs = ObservableState::new(Arc::new(0));
        let mut stream = obs.subscribe();
        let _ = stream.try_recv();
        assert_eq!(
            stream.recv_timeout(Duration::from_millis(20)),
            Err(RecvError::Timeout)
        );
    }

    #[test]
    fn recv_wakes_on_publication_from_another_thread() {
        let obs = ObservableState::new(Arc::new(0));
        let mut stream = obs.subscribe();
        let _ = stream.try_recv();

        let publisher = obs.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            publisher.publish(Arc::new(42));
        });

        let value = stream.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(*value, 42);
        handle.join().unwrap();
    }

    #[test]
    fn async_stream_yields_values_and_ends() {
        let obs = ObservableState::new(Arc::new(1));
        let mut stream = obs.subscribe();
        assert_eq!(*stream.try_recv().unwrap(), 1);
        let publisher = obs.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            publisher.publish(Arc::new(2));
            std::thread::sleep(Duration::from_millis(20));
            publisher.close();
        });

        block_on(async {
            assert_eq!(*stream.next().await.unwrap(), 2);
            assert!(stream.next().await.is_none());
        });
        handle.join().unwrap();
    }

    #[test]
    fn debug_format() {
        let obs = ObservableState::new(Arc::new(42));
        let dbg = format!("{obs:?}");
        assert!(dbg.contains("ObservableState"));
        assert!(dbg.contains("42"));
    }
}
