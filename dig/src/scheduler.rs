//! Pluggable execution strategies for producer bodies.
//!
//! A [`Scheduler`] decides *where* a producer body runs — inline, on a
//! bounded worker pool, or on a fresh thread per task — never *how* its
//! outcome is observed; that part of the contract belongs to [`Deferred`].

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::anyval::AnyValue;
use crate::deferred::Deferred;
use crate::error::DigError;

/// A unit of work: a producer body (or decorator body) ready to run.
pub type Task = Box<dyn FnOnce() -> Result<AnyValue, DigError> + Send + 'static>;

/// A value-carrying `Deferred` settled by a scheduler once its task runs.
pub type ValueDeferred = Deferred<AnyValue>;

/// Strategy for running scheduled tasks.
///
/// `schedule` may run `task` immediately or merely enqueue it; either way it
/// returns a [`ValueDeferred`] that settles once the task has actually run.
/// `flush` drives enqueued work to completion. Every scheduler variant
/// guarantees that `ValueDeferred::resolve` — and therefore every observer
/// callback chained onto it — runs on the calling (coordinating) thread,
/// never on a worker: only the task closure itself runs off-thread.
pub trait Scheduler: Send + Sync {
    /// Submits `task` for execution, returning a `Deferred` for its result.
    fn schedule(&self, task: Task) -> ValueDeferred;

    /// Drives any outstanding work to completion. A no-op for schedulers
    /// that run tasks inline.
    fn flush(&self);
}

/// Runs every task inline, on the calling thread, before `schedule` returns.
#[derive(Default)]
pub struct Synchronous;

impl Scheduler for Synchronous {
    fn schedule(&self, task: Task) -> ValueDeferred {
        let result = task();
        let deferred = Deferred::new();
        deferred.resolve(result);
        deferred
    }

    fn flush(&self) {}
}

/// Shared bookkeeping for the worker-backed schedulers: a pending queue of
/// not-yet-dispatched tasks and a map of in-flight id -> `ValueDeferred`.
struct Coordinator {
    pending: Mutex<Vec<(usize, Task)>>,
    inflight: Mutex<std::collections::HashMap<usize, ValueDeferred>>,
    next_id: AtomicUsize,
}

impl Coordinator {
    fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            inflight: Mutex::new(std::collections::HashMap::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    fn enqueue(&self, task: Task) -> (usize, ValueDeferred) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let deferred = Deferred::new();
        self.inflight.lock().insert(id, deferred.clone());
        self.pending.lock().push((id, task));
        (id, deferred)
    }
}

/// Runs tasks on a bounded pool of `n` worker threads.
///
/// The coordination loop hands the rearmost pending task to a worker via a
/// rendezvous channel (`crossbeam_channel::bounded(0)`), receives completion
/// notifications on a result channel, and resolves the associated
/// `Deferred` itself — never on the worker.
pub struct Parallel {
    n: usize,
    coordinator: Arc<Coordinator>,
}

impl Parallel {
    /// A pool of `n` worker threads. `n` is clamped to at least 1.
    pub fn new(n: usize) -> Self {
        Self { n: n.max(1), coordinator: Arc::new(Coordinator::new()) }
    }
}

impl Scheduler for Parallel {
    fn schedule(&self, task: Task) -> ValueDeferred {
        self.coordinator.enqueue(task).1
    }

    fn flush(&self) {
        run_pooled(&self.coordinator, self.n);
    }
}

/// Runs every scheduled task on its own freshly spawned thread.
///
/// Semantically identical to [`Parallel`] except there is no fixed worker
/// count: the coordination loop still serializes every `Deferred`
/// resolution on the calling thread.
pub struct Unbounded {
    coordinator: Arc<Coordinator>,
}

impl Default for Unbounded {
    fn default() -> Self {
        Self::new()
    }
}

impl Unbounded {
    /// A scheduler with no bound on concurrently running tasks.
    pub fn new() -> Self {
        Self { coordinator: Arc::new(Coordinator::new()) }
    }
}

impl Scheduler for Unbounded {
    fn schedule(&self, task: Task) -> ValueDeferred {
        self.coordinator.enqueue(task).1
    }

    fn flush(&self) {
        run_unbounded(&self.coordinator);
    }
}

fn run_pooled(coordinator: &Arc<Coordinator>, n: usize) {
    loop {
        let pending: Vec<(usize, Task)> = std::mem::take(&mut *coordinator.pending.lock());
        if pending.is_empty() {
            return;
        }

        let (task_tx, task_rx): (Sender<(usize, Task)>, Receiver<(usize, Task)>) = bounded(0);
        let (result_tx, result_rx): (
            Sender<(usize, Result<AnyValue, DigError>)>,
            Receiver<(usize, Result<AnyValue, DigError>)>,
        ) = unbounded();

        let workers: Vec<JoinHandle<()>> = (0..n)
            .map(|_| {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                thread::spawn(move || {
                    while let Ok((id, task)) = task_rx.recv() {
                        let outcome = task();
                        if result_tx.send((id, outcome)).is_err() {
                            return;
                        }
                    }
                })
            })
            .collect();
        drop(task_rx);
        drop(result_tx);

        let total = pending.len();
        // Feed the rendezvous channel from a dedicated thread so the
        // coordination loop below can drain results concurrently with
        // dispatch, matching the "hands the rearmost pending task to a
        // worker" description without deadlocking a bounded(0) channel.
        let feeder = {
            let task_tx = task_tx.clone();
            thread::spawn(move || {
                for item in pending {
                    if task_tx.send(item).is_err() {
                        return;
                    }
                }
            })
        };
        drop(task_tx);

        let mut received = 0;
        while received < total {
            match result_rx.recv() {
                Ok((id, outcome)) => {
                    received += 1;
                    if let Some(deferred) = coordinator.inflight.lock().remove(&id) {
                        deferred.resolve(outcome);
                    }
                }
                Err(_) => break,
            }
        }

        let _ = feeder.join();
        for worker in workers {
            let _ = worker.join();
        }
    }
}

fn run_unbounded(coordinator: &Arc<Coordinator>) {
    loop {
        let pending: Vec<(usize, Task)> = std::mem::take(&mut *coordinator.pending.lock());
        if pending.is_empty() {
            return;
        }

        let (result_tx, result_rx): (
            Sender<(usize, Result<AnyValue, DigError>)>,
            Receiver<(usize, Result<AnyValue, DigError>)>,
        ) = unbounded();

        let total = pending.len();
        let mut handles = Vec::with_capacity(total);
        for (id, task) in pending {
            let result_tx = result_tx.clone();
            handles.push(thread::spawn(move || {
                let outcome = task();
                let _ = result_tx.send((id, outcome));
            }));
        }
        drop(result_tx);

        let mut received = 0;
        while received < total {
            match result_rx.recv() {
                Ok((id, outcome)) => {
                    received += 1;
                    if let Some(deferred) = coordinator.inflight.lock().remove(&id) {
                        deferred.resolve(outcome);
                    }
                }
                Err(_) => break,
            }
        }
        for handle in handles {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ok(v: u8) -> Result<AnyValue, DigError> {
        Ok(Arc::new(v))
    }

    #[test]
    fn synchronous_runs_inline() {
        let sched = Synchronous::default();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let deferred = sched.schedule(Box::new(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
            ok(1)
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        let mut seen = None;
        deferred.observe(|r| seen = Some(r.is_ok()));
        assert_eq!(seen, Some(true));
    }

    #[test]
    fn parallel_runs_every_task_and_resolves_on_flush() {
        let sched = Parallel::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let mut deferreds = Vec::new();
        for _ in 0..8 {
            let counter = counter.clone();
            deferreds.push(sched.schedule(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                ok(1)
            })));
        }
        sched.flush();
        for d in &deferreds {
            let mut seen = None;
            d.observe(|r| seen = Some(r.is_ok()));
            assert_eq!(seen, Some(true));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn unbounded_runs_every_task() {
        let sched = Unbounded::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut deferreds = Vec::new();
        for _ in 0..4 {
            let counter = counter.clone();
            deferreds.push(sched.schedule(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                ok(1)
            })));
        }
        sched.flush();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        for d in &deferreds {
            let mut seen = None;
            d.observe(|r| seen = Some(r.is_ok()));
            assert_eq!(seen, Some(true));
        }
    }
}
