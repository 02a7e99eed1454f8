//! E2E integration test: many writer threads funnelled through one store.
//!
//! Validates:
//! 1. No lost updates. Every enqueued increment is applied exactly once.
//! 2. Subscribers observe a strictly increasing sequence (conflation may
//!    skip values but never reorders or repeats them).
//! 3. Projections only emit when the extracted value changes.
//! 4. Late subscribers start at the current value.
//! 5. Reads always observe a complete state.
//! 6. Subscribers that keep pace see the same sequence of states.

#![forbid(unsafe_code)]

use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use stateflow_core::{StateStore, StoreConfig, StoreStatus};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
struct Ledger {
    counter: u64,
    /// Sum of writer ids, kept in lockstep with `counter`.
    checksum: u64,
}

impl Ledger {
    fn empty() -> Self {
        Self {
            counter: 0,
            checksum: 0,
        }
    }
}

/// Drain a subscriber until it reports `target`, returning everything seen.
fn collect_until(stream: &mut stateflow_core::StateStream<Ledger>, target: u64) -> Vec<u64> {
    let mut seen = Vec::new();
    loop {
        let state = stream
            .recv_timeout(WAIT)
            .unwrap_or_else(|e| panic!("subscriber stalled after {seen:?}: {e}"));
        seen.push(state.counter);
        if state.counter == target {
            return seen;
        }
    }
}

/// Poll `cond` until it holds, failing the test after [`WAIT`].
fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met within {WAIT:?}");
        thread::sleep(Duration::from_millis(1));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// Test 1: 8 writers x 500 increments
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn e2e_concurrent_writers_apply_every_update() {
    let writers = 8u64;
    let per_writer = 500u64;
    let total = writers * per_writer;

    let store = StateStore::with_config(
        Ledger::empty(),
        StoreConfig::default().thread_name("ledger-actor"),
    )
    .unwrap();
    let mut early = store.observe();
    let mut also_early = store.observe();
    // Take the initial state before any writer can conflate it away.
    assert_eq!(early.recv_timeout(WAIT).unwrap().counter, 0);
    assert_eq!(also_early.recv_timeout(WAIT).unwrap().counter, 0);

    let barrier = Arc::new(Barrier::new(writers as usize));
    let threads: Vec<_> = (1..=writers)
        .map(|id| {
            let handle = store.handle();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..per_writer {
                    handle.update(move |state: &Ledger| Ledger {
                        counter: state.counter + 1,
                        checksum: state.checksum + id,
                    });
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let first = collect_until(&mut early, total);
    let second = collect_until(&mut also_early, total);
    for seen in [&first, &second] {
        assert!(
            seen.windows(2).all(|w| w[0] < w[1]),
            "sequence must be strictly increasing"
        );
    }

    let expected_checksum = per_writer * (writers * (writers + 1) / 2);
    let final_state = store.current();
    assert_eq!(final_state.counter, total);
    assert_eq!(final_state.checksum, expected_checksum);

    let metrics = store.metrics();
    assert_eq!(metrics.mutations_enqueued, total);
    assert_eq!(metrics.mutations_dequeued, total);
    assert_eq!(metrics.mutations_suppressed, 0);
    assert_eq!(metrics.publications, total);
    assert_eq!(metrics.faults, 0);
}

// ═════════════════════════════════════════════════════════════════════════
// Test 2: readers racing writers never see a torn state
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn e2e_reads_interleaved_with_writes_see_consistent_states() {
    let store = StateStore::new(Ledger::empty()).unwrap();
    let (tx, rx) = mpsc::channel();

    let writer = {
        let handle = store.handle();
        thread::spawn(move || {
            for _ in 0..1_000 {
                handle.update(|state: &Ledger| Ledger {
                    counter: state.counter + 1,
                    checksum: state.checksum + 3,
                });
            }
        })
    };
    let reader = {
        let handle = store.handle();
        thread::spawn(move || {
            for _ in 0..1_000 {
                let tx = tx.clone();
                handle.read(move |state: &Ledger| {
                    let _ = tx.send(state.clone());
                });
            }
        })
    };
    writer.join().unwrap();
    reader.join().unwrap();

    let mut last = 0;
    for _ in 0..1_000 {
        let state = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(state.checksum, state.counter * 3);
        assert!(state.counter >= last, "reads are served in order");
        last = state.counter;
    }
}

// ═════════════════════════════════════════════════════════════════════════
// Test 3: counter walkthrough with parity projection
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn e2e_counter_walkthrough() {
    let store = StateStore::new(Ledger::empty()).unwrap();
    let mut all = store.observe();
    assert_eq!(all.recv_timeout(WAIT).unwrap().counter, 0);

    store.update(|state: &Ledger| Ledger {
        counter: state.counter + 1,
        ..state.clone()
    });
    assert_eq!(all.recv_timeout(WAIT).unwrap().counter, 1);

    // Identity produces no emission.
    store.update(Ledger::clone);
    store.update(Ledger::clone);
    wait_until(|| store.metrics().mutations_suppressed == 2);
    assert!(all.try_recv().is_err());
    assert_eq!(store.observable().version(), 1);

    // A late subscriber starts at the current value.
    let mut late = store.observe();
    assert_eq!(late.recv_timeout(WAIT).unwrap().counter, 1);

    let mut counter = store.project(|s: &Ledger| s.counter);
    let mut parity = store.project(|s: &Ledger| s.counter % 2);
    assert_eq!(counter.recv_timeout(WAIT).unwrap(), 1);
    assert_eq!(parity.recv_timeout(WAIT).unwrap(), 1);

    store.update(|state: &Ledger| Ledger {
        counter: state.counter + 1,
        ..state.clone()
    });
    assert_eq!(counter.recv_timeout(WAIT).unwrap(), 2);
    assert_eq!(late.recv_timeout(WAIT).unwrap().counter, 2);
    // Parity went 1 -> 0, so it does emit.
    assert_eq!(parity.recv_timeout(WAIT).unwrap(), 0);

    store.update(|state: &Ledger| Ledger {
        counter: state.counter + 2,
        ..state.clone()
    });
    assert_eq!(counter.recv_timeout(WAIT).unwrap(), 4);
    assert_eq!(late.recv_timeout(WAIT).unwrap().counter, 4);
    assert!(parity.recv_timeout(Duration::from_millis(50)).is_err());
}

// ═════════════════════════════════════════════════════════════════════════
// Test 4: handles outlive the store without panicking
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn e2e_handles_after_dispose_are_inert() {
    let store = StateStore::new(Ledger::empty()).unwrap();
    let handle = store.handle();
    let mut stream = store.observe();
    assert_eq!(stream.recv_timeout(WAIT).unwrap().counter, 0);

    store.dispose();
    assert_eq!(handle.status(), StoreStatus::Disposed);

    handle.update(|state: &Ledger| Ledger {
        counter: state.counter + 1,
        ..state.clone()
    });
    handle.read(|_| panic!("reads after dispose must not run"));
    assert_eq!(handle.current().counter, 0);
    assert!(stream.recv_timeout(WAIT).is_err());
    assert!(stream.is_terminated());

    let metrics = handle.metrics();
    assert_eq!(metrics.mutations_dropped, 1);
    assert_eq!(metrics.reads_dropped, 1);
}

// ═════════════════════════════════════════════════════════════════════════
// Test 5: paced subscribers observe identical sequences
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn e2e_paced_subscribers_see_identical_sequences() {
    let rounds = 50u64;
    let store = StateStore::new(Ledger::empty()).unwrap();
    let barrier = Arc::new(Barrier::new(3));

    let subscribers: Vec<_> = (0..2)
        .map(|_| {
            let mut stream = store.observe();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut seen = vec![stream.recv_timeout(WAIT).unwrap().counter];
                barrier.wait();
                while seen.last() != Some(&rounds) {
                    seen.push(stream.recv_timeout(WAIT).unwrap().counter);
                    barrier.wait();
                }
                seen
            })
        })
        .collect();

    barrier.wait();
    for _ in 0..rounds {
        // Suppressed, so each round publishes exactly one state.
        store.update(Ledger::clone);
        store.update(|state: &Ledger| Ledger {
            counter: state.counter + 1,
            ..state.clone()
        });
        barrier.wait();
    }

    let sequences: Vec<Vec<u64>> = subscribers.into_iter().map(|t| t.join().unwrap()).collect();
    let expected: Vec<u64> = (0..=rounds).collect();
    assert_eq!(sequences[0], expected);
    assert_eq!(sequences[1], expected);

    let metrics = store.metrics();
    assert_eq!(metrics.publications, rounds);
    assert_eq!(metrics.mutations_suppressed, rounds);
}
