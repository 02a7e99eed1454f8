#![forbid(unsafe_code)]

//! Single-writer state store driven by a dedicated worker thread.
//!
//! [`StateStore`] moves its state into a worker thread and becomes the only
//! way to reach it. Callers enqueue mutation and read requests; the worker
//! serves them one at a time, so no lock ever guards the state.
//!
//! # Dispatch
//!
//! The worker waits on both queues at once with `futures::select!`. When
//! both have work ready the branch is chosen at random, so:
//!
//! - requests on the **same** queue run in enqueue order;
//! - a read and a mutation enqueued back to back may run in either order.
//!
//! A read that must observe a particular mutation belongs inside that
//! mutation, or in a subscription.
//!
//! # Suppression
//!
//! A mutation whose result equals the current state is discarded without
//! publishing. Subscribers only ever see distinct consecutive states.
//!
//! # Failure Modes
//!
//! - **Handler panics or returns `Err`**: governed by [`FaultPolicy`]. The
//!   enqueuing caller never sees the fault.
//! - **Enqueue outpaces the worker**: queues grow without bound unless
//!   `max_pending` is set. See [`crate::metrics`].
//! - **Dispose with pending requests**: the requests are discarded.
//!
//! # Example
//!
//! ```
//! use stateflow_core::StateStore;
//! use std::time::Duration;
//!
//! let store = StateStore::new(0_u32).unwrap();
//! let mut values = store.observe();
//! assert_eq!(*values.recv().unwrap(), 0);
//!
//! store.update(|n| n + 1);
//! assert_eq!(*values.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
//!
//! store.dispose();
//! ```

use std::fmt;
use std::ops::Deref;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use futures::StreamExt;
use futures::channel::{mpsc, oneshot};
use futures::executor::block_on;
use futures::future::FutureExt;

use crate::cell::StateCell;
use crate::config::{DepthHook, FaultHook, FaultPolicy, StoreConfig};
use crate::error::{HandlerFault, RequestKind, Result};
use crate::metrics::{Counters, QueueDepth, QueueMetrics};
use crate::observable::{ObservableState, StateStream, lock};
use crate::projection::{Extractors, Mapped, Projection, Single};

type MutationFn<S> = Box<dyn FnOnce(&S) -> std::result::Result<S, String> + Send>;
type ReadFn<S> = Box<dyn FnOnce(&S) + Send>;

/// Lifecycle of a store's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    /// Accepting and serving requests.
    Running,
    /// Stopped after a handler fault under [`FaultPolicy::Poison`].
    Poisoned,
    /// Stopped by [`StateStore::dispose`] or drop.
    Disposed,
}

#[derive(Debug, Default)]
struct Control {
    stopped: AtomicBool,
    poisoned: AtomicBool,
    last_fault: Mutex<Option<HandlerFault>>,
}

impl Control {
    fn accepting(&self) -> bool {
        !self.stopped.load(Ordering::Acquire) && !self.poisoned.load(Ordering::Acquire)
    }
}

struct Core<S> {
    mutations: mpsc::UnboundedSender<MutationFn<S>>,
    reads: mpsc::UnboundedSender<ReadFn<S>>,
    observable: ObservableState<S>,
    counters: Arc<Counters>,
    control: Arc<Control>,
    depth_warning: Option<usize>,
    max_pending: Option<usize>,
    on_depth: Option<DepthHook>,
}

impl<S> Core<S> {
    /// Reserve a slot for one request. `None` means the request is dropped.
    fn admit(&self, kind: RequestKind) -> Option<usize> {
        if !self.control.accepting() {
            self.counters.record_drop(kind);
            tracing::debug!(%kind, "request discarded: store is not running");
            return None;
        }
        let depth = self.counters.reserve(kind, self.max_pending);
        if depth.is_none() {
            self.counters.record_drop(kind);
            tracing::warn!(
                %kind,
                cap = self.max_pending.unwrap_or_default(),
                "request dropped: queue is full"
            );
        }
        depth
    }

    fn enqueued(&self, kind: RequestKind, depth: usize) {
        let Some(threshold) = self.depth_warning else {
            return;
        };
        if self.counters.try_alert(kind, depth, threshold) {
            tracing::warn!(
                %kind,
                pending = depth,
                threshold,
                "request queue depth crossed warning threshold"
            );
            if let Some(hook) = &self.on_depth {
                hook(QueueDepth {
                    kind,
                    pending: depth,
                    threshold,
                });
            }
        }
    }

    fn rejected(&self, kind: RequestKind) {
        self.counters.release(kind);
        self.counters.record_drop(kind);
    }

    fn submit_mutation(&self, mutation: MutationFn<S>) {
        let kind = RequestKind::Mutation;
        let Some(depth) = self.admit(kind) else {
            return;
        };
        if self.mutations.unbounded_send(mutation).is_err() {
            self.rejected(kind);
            return;
        }
        self.enqueued(kind, depth);
    }

    fn submit_read(&self, read: ReadFn<S>) {
        let kind = RequestKind::Read;
        let Some(depth) = self.admit(kind) else {
            return;
        };
        if self.reads.unbounded_send(read).is_err() {
            self.rejected(kind);
            return;
        }
        self.enqueued(kind, depth);
    }
}

/// Cloneable, thread-safe access to a running store.
///
/// A handle can enqueue requests and observe state but cannot stop the
/// worker; only the owning [`StateStore`] can.
pub struct StoreHandle<S> {
    core: Arc<Core<S>>,
}

impl<S> Clone for StoreHandle<S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for StoreHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("state", &self.core.observable)
            .field("status", &self.status())
            .finish()
    }
}

impl<S> StoreHandle<S>
where
    S: PartialEq + Send + Sync + 'static,
{
    /// Enqueue a mutation. Returns immediately.
    ///
    /// `f` runs on the worker thread and must not block. If its result
    /// equals the current state nothing is published.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&S) -> S + Send + 'static,
    {
        self.core
            .submit_mutation(Box::new(move |state: &S| Ok::<S, String>(f(state))));
    }

    /// Enqueue a fallible mutation. An `Err` is handled as a handler fault
    /// and leaves the state untouched.
    pub fn try_update<F, E>(&self, f: F)
    where
        F: FnOnce(&S) -> std::result::Result<S, E> + Send + 'static,
        E: fmt::Display,
    {
        self.core.submit_mutation(Box::new(move |state: &S| {
            f(state).map_err(|e| e.to_string())
        }));
    }

    /// Enqueue a read. `f` is called on the worker thread with the state at
    /// the moment the read is served.
    pub fn read<F>(&self, f: F)
    where
        F: FnOnce(&S) + Send + 'static,
    {
        self.core.submit_read(Box::new(f));
    }
}

impl<S> StoreHandle<S> {
    /// Latest published state.
    #[must_use]
    pub fn current(&self) -> Arc<S> {
        self.core.observable.current()
    }

    /// Subscribe to every distinct state, starting with the current one.
    #[must_use]
    pub fn observe(&self) -> StateStream<S> {
        self.core.observable.subscribe()
    }

    #[must_use]
    pub fn project<F, A>(&self, extraction: F) -> Projection<S, Single<F>>
    where
        F: Fn(&S) -> A + Send + 'static,
        A: PartialEq + Clone + Send + 'static,
    {
        self.core.observable.project(extraction)
    }

    #[must_use]
    pub fn project_many<E: Extractors<S>>(&self, extractors: E) -> Projection<S, E> {
        self.core.observable.project_many(extractors)
    }

    #[must_use]
    pub fn map<F, T>(&self, map: F) -> Mapped<S, F>
    where
        F: Fn(&S) -> T,
    {
        self.core.observable.map(map)
    }

    #[must_use]
    pub fn observable(&self) -> &ObservableState<S> {
        &self.core.observable
    }

    #[must_use]
    pub fn metrics(&self) -> QueueMetrics {
        self.core.counters.snapshot()
    }

    #[must_use]
    pub fn status(&self) -> StoreStatus {
        let control = &self.core.control;
        if control.poisoned.load(Ordering::Acquire) {
            StoreStatus::Poisoned
        } else if control.stopped.load(Ordering::Acquire) {
            StoreStatus::Disposed
        } else {
            StoreStatus::Running
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status() == StoreStatus::Running
    }

    /// The most recent handler fault, if any.
    #[must_use]
    pub fn last_fault(&self) -> Option<HandlerFault> {
        lock(&self.core.control.last_fault).clone()
    }
}

/// Owner of a state worker.
///
/// Dereferences to [`StoreHandle`] for enqueueing and observation. Dropping
/// the store disposes it.
pub struct StateStore<S> {
    handle: StoreHandle<S>,
    shutdown: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl<S: fmt::Debug> fmt::Debug for StateStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("handle", &self.handle)
            .finish()
    }
}

impl<S> StateStore<S>
where
    S: PartialEq + Send + Sync + 'static,
{
    /// Start a store with the default configuration.
    pub fn new(initial: S) -> Result<Self> {
        Self::with_config(initial, StoreConfig::default())
    }

    pub fn with_config(initial: S, config: StoreConfig) -> Result<Self> {
        let initial = Arc::new(initial);
        let observable = ObservableState::new(Arc::clone(&initial));
        let counters = Arc::new(Counters::default());
        let control = Arc::new(Control::default());
        let (mutation_tx, mutation_rx) = mpsc::unbounded();
        let (read_tx, read_rx) = mpsc::unbounded();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker = Worker {
            cell: StateCell::new(initial),
            observable: observable.clone(),
            counters: Arc::clone(&counters),
            control: Arc::clone(&control),
            policy: config.fault_policy,
            depth_warning: config.depth_warning,
            on_fault: config.on_fault.clone(),
        };
        let join = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker.run(mutation_rx, read_rx, shutdown_rx))?;

        tracing::debug!(
            thread = %config.thread_name,
            policy = ?config.fault_policy,
            "state worker started"
        );

        Ok(Self {
            handle: StoreHandle {
                core: Arc::new(Core {
                    mutations: mutation_tx,
                    reads: read_tx,
                    observable,
                    counters,
                    control,
                    depth_warning: config.depth_warning,
                    max_pending: config.max_pending,
                    on_depth: config.on_depth,
                }),
            },
            shutdown: Some(shutdown_tx),
            worker: Some(join),
        })
    }
}

impl<S> StateStore<S> {
    /// A cloneable handle. Requests made through it after disposal are
    /// dropped.
    #[must_use]
    pub fn handle(&self) -> StoreHandle<S> {
        self.handle.clone()
    }

    /// Stop the worker and discard every pending request.
    ///
    /// Subscriber streams end once they have drained their last value.
    pub fn dispose(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.handle.core.control.stopped.store(true, Ordering::Release);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let Some(worker) = self.worker.take() else {
            return;
        };
        // Disposing from inside a handler: the loop exits once it returns.
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            tracing::warn!("state worker panicked outside a handler");
        }
        tracing::debug!("state store disposed");
    }
}

impl<S> Deref for StateStore<S> {
    type Target = StoreHandle<S>;

    fn deref(&self) -> &StoreHandle<S> {
        &self.handle
    }
}

impl<S> Drop for StateStore<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Step<S> {
    Mutate(MutationFn<S>),
    Read(ReadFn<S>),
    Stop,
}

enum Flow {
    Continue,
    Stop,
}

/// Everything the worker thread owns.
struct Worker<S> {
    cell: StateCell<S>,
    observable: ObservableState<S>,
    counters: Arc<Counters>,
    control: Arc<Control>,
    policy: FaultPolicy,
    depth_warning: Option<usize>,
    on_fault: Option<FaultHook>,
}

impl<S: PartialEq> Worker<S> {
    fn run(
        mut self,
        mut mutations: mpsc::UnboundedReceiver<MutationFn<S>>,
        mut reads: mpsc::UnboundedReceiver<ReadFn<S>>,
        shutdown: oneshot::Receiver<()>,
    ) {
        let mut shutdown = shutdown.fuse();
        block_on(async {
            loop {
                let step = futures::select! {
                    mutation = mutations.next() => mutation.map_or(Step::Stop, Step::Mutate),
                    read = reads.next() => read.map_or(Step::Stop, Step::Read),
                    _ = shutdown => Step::Stop,
                    complete => Step::Stop,
                };
                if !self.control.accepting() {
                    break;
                }
                let flow = match step {
                    Step::Mutate(mutation) => self.apply(mutation),
                    Step::Read(read) => self.serve(read),
                    Step::Stop => Flow::Stop,
                };
                if let Flow::Stop = flow {
                    break;
                }
            }
        });
        self.observable.close();
        tracing::debug!(
            publications = self.observable.version(),
            "state worker stopped"
        );
    }

    fn dequeued(&self, kind: RequestKind) {
        let depth = self.counters.record_dequeue(kind);
        if let Some(threshold) = self.depth_warning {
            self.counters.rearm(kind, depth, threshold);
        }
    }

    fn apply(&mut self, mutation: MutationFn<S>) -> Flow {
        self.dequeued(RequestKind::Mutation);
        let cell = &self.cell;
        let candidate = match catch_unwind(AssertUnwindSafe(|| mutation(cell.get()))) {
            Ok(Ok(candidate)) => candidate,
            Ok(Err(message)) => return self.fault(HandlerFault::new(RequestKind::Mutation, message)),
            Err(payload) => {
                return self.fault(HandlerFault::from_panic(RequestKind::Mutation, &*payload));
            }
        };
        match self.cell.replace(candidate) {
            Some(next) => {
                let version = self.observable.publish(next);
                self.counters.record_publication();
                tracing::trace!(version, "state published");
            }
            None => {
                self.counters.record_suppressed();
                tracing::trace!("mutation left state unchanged");
            }
        }
        Flow::Continue
    }

    fn serve(&mut self, read: ReadFn<S>) -> Flow {
        self.dequeued(RequestKind::Read);
        let cell = &self.cell;
        match catch_unwind(AssertUnwindSafe(|| read(cell.get()))) {
            Ok(()) => Flow::Continue,
            Err(payload) => self.fault(HandlerFault::from_panic(RequestKind::Read, &*payload)),
        }
    }

    fn fault(&mut self, fault: HandlerFault) -> Flow {
        self.counters.record_fault();
        tracing::error!(
            kind = %fault.kind,
            message = %fault.message,
            policy = ?self.policy,
            "state handler fault"
        );
        *lock(&self.control.last_fault) = Some(fault.clone());
        if let Some(hook) = &self.on_fault
            && catch_unwind(AssertUnwindSafe(|| hook(&fault))).is_err()
        {
            tracing::warn!("fault hook panicked");
        }
        match self.policy {
            FaultPolicy::Isolate => Flow::Continue,
            FaultPolicy::Poison => {
                self.control.poisoned.store(true, Ordering::Release);
                Flow::Stop
            }
        }
    }
}
