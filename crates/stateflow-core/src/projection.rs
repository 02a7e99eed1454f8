#![forbid(unsafe_code)]

//! Derived, change-suppressed views over an [`ObservableState`].
//!
//! A [`Projection`] applies one to seven extraction functions to every state
//! it receives and emits the extracted value (or tuple) only when it differs
//! from the last one this projection emitted. Suppression state lives in the
//! projection itself, so two projections over the same store emit on
//! independent schedules.
//!
//! Arity is handled by [`Extractors`], implemented for closure tuples of
//! length 1 through 7. A tuple `(f1, f2)` extracts `(A, B)`.
//!
//! ```
//! # use stateflow_core::StateStore;
//! #[derive(Debug, PartialEq)]
//! struct Form { name: String, age: u32, dirty: bool }
//!
//! let store = StateStore::new(Form { name: "ada".into(), age: 36, dirty: false }).unwrap();
//! let mut name_and_age = store.project_many((
//!     |f: &Form| f.name.clone(),
//!     |f: &Form| f.age,
//! ));
//! assert_eq!(name_and_age.recv(), Some(("ada".to_string(), 36)));
//! ```

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::Stream;

use crate::observable::{ObservableState, RecvError, StateStream};

/// A set of extraction functions applied together to one state.
///
/// Implemented for tuples of `Fn(&S) -> T` closures of arity 1 to 7. Each
/// extracted type must compare structurally.
pub trait Extractors<S>: Send + 'static {
    type Output: PartialEq + Clone + Send + 'static;

    fn extract(&self, state: &S) -> Self::Output;
}

/// A single extraction whose output is the bare value rather than a 1-tuple.
pub struct Single<F>(F);

impl<S, F, A> Extractors<S> for Single<F>
where
    F: Fn(&S) -> A + Send + 'static,
    A: PartialEq + Clone + Send + 'static,
{
    type Output = A;

    fn extract(&self, state: &S) -> A {
        (self.0)(state)
    }
}

macro_rules! impl_extractors {
    ($(($f:ident, $a:ident, $idx:tt)),+) => {
        impl<S, $($f, $a),+> Extractors<S> for ($($f,)+)
        where
            $(
                $f: Fn(&S) -> $a + Send + 'static,
                $a: PartialEq + Clone + Send + 'static,
            )+
        {
            type Output = ($($a,)+);

            fn extract(&self, state: &S) -> Self::Output {
                ($((self.$idx)(state),)+)
            }
        }
    };
}

impl_extractors!((F0, A0, 0));
impl_extractors!((F0, A0, 0), (F1, A1, 1));
impl_extractors!((F0, A0, 0), (F1, A1, 1), (F2, A2, 2));
impl_extractors!((F0, A0, 0), (F1, A1, 1), (F2, A2, 2), (F3, A3, 3));
impl_extractors!((F0, A0, 0), (F1, A1, 1), (F2, A2, 2), (F3, A3, 3), (F4, A4, 4));
impl_extractors!(
    (F0, A0, 0),
    (F1, A1, 1),
    (F2, A2, 2),
    (F3, A3, 3),
    (F4, A4, 4),
    (F5, A5, 5)
);
impl_extractors!(
    (F0, A0, 0),
    (F1, A1, 1),
    (F2, A2, 2),
    (F3, A3, 3),
    (F4, A4, 4),
    (F5, A5, 5),
    (F6, A6, 6)
);

/// Change-suppressed stream of values extracted from a state stream.
pub struct Projection<S, E: Extractors<S>> {
    source: StateStream<S>,
    extractors: E,
    last: Option<E::Output>,
}

// Fields are never structurally pinned.
impl<S, E: Extractors<S>> Unpin for Projection<S, E> {}

impl<S, E: Extractors<S>> fmt::Debug for Projection<S, E>
where
    E::Output: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projection")
            .field("last", &self.last)
            .field("source", &self.source)
            .finish()
    }
}

impl<S, E: Extractors<S>> Projection<S, E> {
    pub(crate) fn new(source: StateStream<S>, extractors: E) -> Self {
        Self {
            source,
            extractors,
            last: None,
        }
    }

    /// The last value this projection emitted.
    #[must_use]
    pub fn last(&self) -> Option<&E::Output> {
        self.last.as_ref()
    }

    fn accept(&mut self, state: &S) -> Option<E::Output> {
        let next = self.extractors.extract(state);
        if self.last.as_ref() == Some(&next) {
            return None;
        }
        self.last = Some(next.clone());
        Some(next)
    }

    /// Block until the extracted value changes. `None` once the store stops.
    pub fn recv(&mut self) -> Option<E::Output> {
        loop {
            let state = self.source.recv()?;
            if let Some(value) = self.accept(&state) {
                return Some(value);
            }
        }
    }

    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<E::Output, RecvError> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.source.recv_deadline(deadline)?;
            if let Some(value) = self.accept(&state) {
                return Ok(value);
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<E::Output, RecvError> {
        loop {
            let state = self.source.try_recv()?;
            if let Some(value) = self.accept(&state) {
                return Ok(value);
            }
        }
    }
}

impl<S, E: Extractors<S>> Stream for Projection<S, E> {
    type Item = E::Output;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.source).poll_next(cx) {
                Poll::Ready(Some(state)) => {
                    if let Some(value) = this.accept(&state) {
                        return Poll::Ready(Some(value));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Stream of a mapped value for every received state, without suppression.
pub struct Mapped<S, F> {
    source: StateStream<S>,
    map: F,
}

impl<S, F> Unpin for Mapped<S, F> {}

impl<S, F, T> Mapped<S, F>
where
    F: Fn(&S) -> T,
{
    pub fn recv(&mut self) -> Option<T> {
        self.source.recv().map(|state| (self.map)(&state))
    }

    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<T, RecvError> {
        self.source
            .recv_timeout(timeout)
            .map(|state| (self.map)(&state))
    }

    pub fn try_recv(&mut self) -> Result<T, RecvError> {
        self.source.try_recv().map(|state| (self.map)(&state))
    }
}

impl<S, F, T> Stream for Mapped<S, F>
where
    F: Fn(&S) -> T,
{
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        match Pin::new(&mut this.source).poll_next(cx) {
            Poll::Ready(Some(state)) => Poll::Ready(Some((this.map)(&state))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> ObservableState<S> {
    /// Project one field of the state.
    #[must_use]
    pub fn project<F, A>(&self, extraction: F) -> Projection<S, Single<F>>
    where
        F: Fn(&S) -> A + Send + 'static,
        A: PartialEq + Clone + Send + 'static,
    {
        Projection::new(self.subscribe(), Single(extraction))
    }

    /// Project a tuple of one to seven fields of the state.
    #[must_use]
    pub fn project_many<E: Extractors<S>>(&self, extractors: E) -> Projection<S, E> {
        Projection::new(self.subscribe(), extractors)
    }

    /// Map every received state, emitting even when the result repeats.
    #[must_use]
    pub fn map<F, T>(&self, map: F) -> Mapped<S, F>
    where
        F: Fn(&S) -> T,
    {
        Mapped {
            source: self.subscribe(),
            map,
        }
    }
}
