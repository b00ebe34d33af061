//! Time-gated worker pool
//!
//! This module handles:
//! - An eligible-time ordered queue of pending work (FIFO among equal times)
//! - A fixed number of worker tasks that sleep until work becomes due
//! - Panic isolation so one bad unit of work never takes down a worker
//! - Waiting for the queue to drain

use futures::future::BoxFuture;
use futures::FutureExt;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A unit of work waiting for its eligible time
pub struct ScheduledTask {
    /// Earliest instant the work may start
    pub eligible_at: Instant,

    /// Submission order, used to break ties between equal instants
    pub seq: u64,

    work: BoxFuture<'static, ()>,
}

// Implement ordering traits for the min-heap
// Earlier instants (then lower sequence numbers) are popped first from BinaryHeap
impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .eligible_at
            .cmp(&self.eligible_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.eligible_at == other.eligible_at && self.seq == other.seq
    }
}

impl Eq for ScheduledTask {}

struct Queue {
    tasks: BinaryHeap<ScheduledTask>,
    next_seq: u64,
}

struct Shared {
    queue: Mutex<Queue>,

    /// Woken on every submission so sleeping workers re-check the head
    wake: Notify,

    /// Work submitted but not yet finished
    outstanding: watch::Sender<usize>,
}

impl Shared {
    fn lock_queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until the earliest queued task is due and takes it
    async fn next_due(&self) -> ScheduledTask {
        loop {
            // Register interest before looking at the queue so a submission
            // landing in between still wakes us
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut queue = self.lock_queue();
                match queue.tasks.peek().map(|task| task.eligible_at) {
                    Some(at) if at <= Instant::now() => match queue.tasks.pop() {
                        Some(task) => return task,
                        None => continue,
                    },
                    other => other,
                }
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = &mut notified => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    fn finish_one(&self) {
        self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Scheduler runs submitted work no earlier than its eligible time
///
/// The scheduler coordinates:
/// - A fixed pool of `worker_count` Tokio tasks (at most that many units of
///   work run at once)
/// - Dispatch in (eligible time, submission order) order
/// - Draining via [`Scheduler::join`]
///
/// Dropping the scheduler aborts its workers; queued work is discarded.
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Starts a scheduler with `worker_count` workers (at least one)
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (outstanding, _) = watch::channel(0);

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                tasks: BinaryHeap::new(),
                next_seq: 0,
            }),
            wake: Notify::new(),
            outstanding,
        });

        let workers = (0..worker_count)
            .map(|id| tokio::spawn(run_worker(id, shared.clone())))
            .collect();

        tracing::debug!("Started scheduler with {} workers", worker_count);

        Self { shared, workers }
    }

    /// Enqueues `work` to run at or after `eligible_at`
    ///
    /// Returns the submission sequence number.
    pub fn submit<F>(&self, eligible_at: Instant, work: F) -> u64
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shared.outstanding.send_modify(|n| *n += 1);

        let seq = {
            let mut queue = self.shared.lock_queue();
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.tasks.push(ScheduledTask {
                eligible_at,
                seq,
                work: work.boxed(),
            });
            seq
        };

        self.shared.wake.notify_waiters();
        seq
    }

    /// Waits until every submitted unit of work has finished
    ///
    /// Work submitted by running work is waited for as well.
    pub async fn join(&self) {
        let mut outstanding = self.shared.outstanding.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = outstanding.wait_for(|n| *n == 0).await;
    }

    /// Returns the number of tasks queued and not yet started
    pub fn pending(&self) -> usize {
        self.shared.lock_queue().tasks.len()
    }

    /// Returns the number of tasks submitted and not yet finished
    pub fn outstanding(&self) -> usize {
        *self.shared.outstanding.borrow()
    }

    /// Returns the number of workers
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.workers.len())
            .field("pending", &self.pending())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

async fn run_worker(id: usize, shared: Arc<Shared>) {
    loop {
        let task = shared.next_due().await;
        let seq = task.seq;
        tracing::trace!("Worker {} running task {}", id, seq);

        if let Err(panic) = AssertUnwindSafe(task.work).catch_unwind().await {
            tracing::warn!(
                "Task {} panicked on worker {}: {}",
                seq,
                id,
                panic_message(panic.as_ref())
            );
        }

        shared.finish_one();
    }
}

/// Extracts a human-readable message from a panic payload
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
