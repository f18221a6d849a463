//! A single-assignment observable eventual outcome.
//!
//! A [`Deferred<T>`] is either unsettled or settled with `Result<T, DigError>`.
//! Observers registered before settlement are queued and run, in insertion
//! order, by whichever call to [`Deferred::resolve`] first settles it.
//! Everything here runs under whatever "coordinating control of flow" calls
//! it — there is no executor hidden inside `Deferred` itself, unlike a
//! typical future.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::DigError;

type Callback<T> = Box<dyn FnOnce(Result<T, DigError>) + Send + 'static>;

enum State<T> {
    Pending(Vec<Callback<T>>),
    Settled(Result<T, DigError>),
}

struct Inner<T> {
    state: Mutex<State<T>>,
}

/// A single-assignment observable outcome, cheap to clone (ref-counted).
pub struct Deferred<T: Clone + Send + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + 'static> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Clone + Send + 'static> Deferred<T> {
    /// A new, unsettled `Deferred`.
    pub fn new() -> Self {
        Self { inner: Arc::new(Inner { state: Mutex::new(State::Pending(Vec::new())) }) }
    }

    /// An already-settled, successful `Deferred`.
    pub fn settled(value: T) -> Self {
        let d = Self::new();
        d.resolve(Ok(value));
        d
    }

    /// An already-settled, failed `Deferred`.
    pub fn failed(err: DigError) -> Self {
        let d = Self::new();
        d.resolve(Err(err));
        d
    }

    /// Registers `callback` to run with the outcome. If this `Deferred` is
    /// already settled, `callback` runs synchronously before `observe`
    /// returns; otherwise it is queued for [`Deferred::resolve`].
    pub fn observe(&self, callback: impl FnOnce(Result<T, DigError>) + Send + 'static) {
        let mut state = self.inner.state.lock();
        match &mut *state {
            State::Settled(result) => {
                let result = result.clone();
                drop(state);
                callback(result);
            }
            State::Pending(queue) => queue.push(Box::new(callback)),
        }
    }

    /// Settles this `Deferred`, if it is not already settled. Idempotent:
    /// only the first call has any effect. Invokes every queued observer,
    /// in insertion order, then clears the queue.
    pub fn resolve(&self, result: Result<T, DigError>) {
        let callbacks = {
            let mut state = self.inner.state.lock();
            match &*state {
                State::Settled(_) => return,
                State::Pending(_) => {
                    let queue = match std::mem::replace(&mut *state, State::Settled(result.clone()))
                    {
                        State::Pending(queue) => queue,
                        State::Settled(_) => unreachable!(),
                    };
                    queue
                }
            }
        };
        for callback in callbacks {
            callback(result.clone());
        }
    }

    /// Chains a continuation that itself returns a `Deferred`. If this
    /// settles successfully, `k` runs and its outcome is forwarded; if this
    /// settles with an error, the error is forwarded without running `k`.
    pub fn then<U, K>(&self, k: K) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        K: FnOnce(T) -> Deferred<U> + Send + 'static,
    {
        let next = Deferred::new();
        let next_for_cb = next.clone();
        self.observe(move |result| match result {
            Ok(value) => {
                let inner = k(value);
                let next_for_inner = next_for_cb.clone();
                inner.observe(move |outcome| next_for_inner.resolve(outcome));
            }
            Err(err) => next_for_cb.resolve(Err(err)),
        });
        next
    }

    /// Maps an error into a successful value; forwards success unchanged.
    pub fn catch<M>(&self, m: M) -> Deferred<T>
    where
        M: FnOnce(DigError) -> T + Send + 'static,
    {
        let next = Deferred::new();
        let next_for_cb = next.clone();
        self.observe(move |result| match result {
            Ok(value) => next_for_cb.resolve(Ok(value)),
            Err(err) => next_for_cb.resolve(Ok(m(err))),
        });
        next
    }
}

impl<T: Clone + Send + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves with the first error reported by any member, else with `()`
/// once every member has settled successfully.
pub fn when_all<T: Clone + Send + 'static>(members: Vec<Deferred<T>>) -> Deferred<()> {
    let out = Deferred::new();
    if members.is_empty() {
        out.resolve(Ok(()));
        return out;
    }

    let remaining = Arc::new(Mutex::new(members.len()));
    let settled = Arc::new(Mutex::new(false));
    for member in members {
        let out = out.clone();
        let remaining = remaining.clone();
        let settled = settled.clone();
        member.observe(move |result| {
            if let Err(err) = result {
                let mut done = settled.lock();
                if !*done {
                    *done = true;
                    out.resolve(Err(err));
                }
                return;
            }
            let mut left = remaining.lock();
            *left -= 1;
            if *left == 0 {
                let mut done = settled.lock();
                if !*done {
                    *done = true;
                    drop(done);
                    out.resolve(Ok(()));
                }
            }
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DigError, ResolutionError};
    use crate::key::Key;

    fn missing(name: &'static str) -> DigError {
        let _ = name;
        DigError::Resolution(ResolutionError::Missing { key: Key::value::<u8>() })
    }

    #[test]
    fn observe_before_resolve_is_queued_in_order() {
        let d: Deferred<u8> = Deferred::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3u8 {
            let order = order.clone();
            d.observe(move |_| order.lock().push(i));
        }
        d.resolve(Ok(1));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn observe_after_resolve_runs_synchronously() {
        let d = Deferred::settled(5u8);
        let mut seen = None;
        d.observe(|result| seen = Some(result.unwrap()));
        assert_eq!(seen, Some(5));
    }

    #[test]
    fn resolve_is_idempotent() {
        let d: Deferred<u8> = Deferred::new();
        d.resolve(Ok(1));
        d.resolve(Ok(2));
        let mut seen = None;
        d.observe(|result| seen = Some(result.unwrap()));
        assert_eq!(seen, Some(1));
    }

    #[test]
    fn then_chains_success() {
        let d: Deferred<u8> = Deferred::settled(2);
        let chained = d.then(|v| Deferred::settled(v * 10));
        let mut seen = None;
        chained.observe(|result| seen = Some(result.unwrap()));
        assert_eq!(seen, Some(20));
    }

    #[test]
    fn then_short_circuits_on_error() {
        let d: Deferred<u8> = Deferred::failed(missing("x"));
        let mut ran = false;
        let chained = d.then(|v| {
            ran = true;
            Deferred::settled(v)
        });
        let mut saw_err = false;
        chained.observe(|result| saw_err = result.is_err());
        assert!(!ran);
        assert!(saw_err);
    }

    #[test]
    fn when_all_waits_for_every_member() {
        let a: Deferred<u8> = Deferred::new();
        let b: Deferred<u8> = Deferred::new();
        let all = when_all(vec![a.clone(), b.clone()]);
        let mut done = false;
        all.observe(|result| done = result.is_ok());
        assert!(!done);
        a.resolve(Ok(1));
        assert!(!done);
        b.resolve(Ok(2));
        assert!(done);
    }

    #[test]
    fn when_all_reports_first_error() {
        let a: Deferred<u8> = Deferred::new();
        let b: Deferred<u8> = Deferred::new();
        let all = when_all(vec![a.clone(), b.clone()]);
        let mut err = None;
        all.observe(|result| err = result.err());
        b.resolve(Err(missing("b")));
        a.resolve(Ok(1));
        assert!(err.is_some());
    }
}
