// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Timed job scheduler (§4.9): a fixed pool of worker threads, each
//! holding a priority queue of `(at_ms, id)`-ordered jobs. Used by the
//! index core as a fallback timer driving the three background steps,
//! redundant with their event-driven wakeups (§4.8).
//!
//! Generalizes the same dedicated-OS-thread, atomic-flag philosophy as
//! [`crate::stop_signal`] into a small thread pool.

use crate::stop_signal::StopSignal;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Opaque handle to a scheduled job, usable to cancel it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct JobId(u64);

/// Options controlling how a job repeats.
#[derive(Copy, Clone, Debug)]
pub struct ScheduleOptions {
    /// Delay before the first run.
    pub delay: Duration,
    /// If set, the job reschedules itself at this cadence after each run.
    pub repeat: Option<Duration>,
    /// Jobs sharing a `strand` value always land on the same worker, which
    /// serialises them relative to each other.
    pub strand: u64,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self { delay: Duration::ZERO, repeat: None, strand: 0 }
    }
}

type Task = Box<dyn FnMut() + Send>;

struct Job {
    id: u64,
    at: Instant,
    repeat: Option<Duration>,
    task: Arc<Mutex<Option<Task>>>,
}

impl Job {
    fn key(&self) -> (Instant, u64) {
        (self.at, self.id)
    }
}

impl Eq for Job {}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct Worker {
    heap: Mutex<BinaryHeap<Reverse<Job>>>,
    wake: Condvar,
}

/// A fixed pool of worker threads running timed, cancellable jobs (§4.9).
pub struct Scheduler {
    workers: Vec<Arc<Worker>>,
    next_id: AtomicU64,
    stop: StopSignal,
    handles: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawns a pool of `worker_count` threads (minimum 1).
    #[must_use]
    pub fn new(worker_count: usize) -> Arc<Self> {
        let worker_count = worker_count.max(1);
        let stop = StopSignal::default();

        let workers: Vec<Arc<Worker>> = (0..worker_count)
            .map(|_| Arc::new(Worker { heap: Mutex::new(BinaryHeap::new()), wake: Condvar::new() }))
            .collect();

        let scheduler = Arc::new(Self {
            workers: workers.clone(),
            next_id: AtomicU64::new(1),
            stop: stop.clone(),
            handles: Mutex::new(Vec::new()),
        });

        let mut handles = Vec::with_capacity(worker_count);
        for worker in workers {
            let stop = stop.clone();
            handles.push(std::thread::spawn(move || run_worker(&worker, &stop)));
        }
        *scheduler.handles.lock().expect("lock is poisoned") = handles;

        scheduler
    }

    /// Schedules `task` to run per `opts`, returning its id and a handle
    /// whose `cancel` nulls the closure in place — the pending job's slot
    /// in the heap stays, but fires as a no-op, and a cancelled repeat
    /// never reschedules (§4.9).
    pub fn schedule(
        &self,
        task: impl FnMut() + Send + 'static,
        opts: ScheduleOptions,
    ) -> (JobId, CancelHandle) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let worker = &self.workers[(opts.strand as usize) % self.workers.len()];
        let task_slot = Arc::new(Mutex::new(Some(Box::new(task) as Task)));

        let job = Job { id, at: Instant::now() + opts.delay, repeat: opts.repeat, task: task_slot.clone() };

        {
            let mut heap = worker.heap.lock().expect("lock is poisoned");
            heap.push(Reverse(job));
        }
        worker.wake.notify_all();

        (JobId(id), CancelHandle(task_slot))
    }

    /// Signals every worker thread to stop and joins them.
    pub fn shutdown(&self) {
        self.stop.send();
        for worker in &self.workers {
            worker.wake.notify_all();
        }
        let mut handles = self.handles.lock().expect("lock is poisoned");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// A cancellation token for one scheduled job.
#[derive(Clone)]
pub struct CancelHandle(Arc<Mutex<Option<Task>>>);

impl CancelHandle {
    /// Nulls the job's closure, so any future firing becomes a no-op.
    pub fn cancel(&self) {
        *self.0.lock().expect("lock is poisoned") = None;
    }
}

fn run_worker(worker: &Worker, stop: &StopSignal) {
    loop {
        if stop.is_stopped() {
            return;
        }

        let due = {
            let mut heap = worker.heap.lock().expect("lock is poisoned");

            match heap.peek() {
                None => {
                    let guard = heap;
                    let (guard, _) = worker
                        .wake
                        .wait_timeout(guard, Duration::from_secs(60))
                        .expect("lock is poisoned");
                    drop(guard);
                    continue;
                }
                Some(Reverse(job)) => {
                    let now = Instant::now();
                    if job.at > now {
                        let wait_for = job.at - now;
                        let (guard, _) =
                            worker.wake.wait_timeout(heap, wait_for).expect("lock is poisoned");
                        drop(guard);
                        continue;
                    }
                    heap.pop().map(|Reverse(job)| job)
                }
            }
        };

        let Some(job) = due else { continue };

        let task = job.task.lock().expect("lock is poisoned").take();
        if let Some(mut task) = task {
            task();

            if let Some(period) = job.repeat {
                // Put the closure back into the *same* `Arc<Mutex<_>>` the
                // original `CancelHandle` holds, instead of wrapping it in
                // a fresh one: otherwise `cancel()` would only ever reach
                // the very next firing, since each reschedule would detach
                // from every outstanding handle.
                *job.task.lock().expect("lock is poisoned") = Some(task);
                let mut heap = worker.heap.lock().expect("lock is poisoned");
                heap.push(Reverse(Job {
                    id: job.id,
                    at: Instant::now() + period,
                    repeat: job.repeat,
                    task: job.task,
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use test_log::test;

    #[test]
    fn runs_a_delayed_job() {
        let scheduler = Scheduler::new(2);
        let ran = Arc::new(AtomicUsize::new(0));

        let ran2 = ran.clone();
        scheduler.schedule(
            move || {
                ran2.fetch_add(1, Ordering::SeqCst);
            },
            ScheduleOptions { delay: Duration::from_millis(10), ..Default::default() },
        );

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(1, ran.load(Ordering::SeqCst));
        scheduler.shutdown();
    }

    #[test]
    fn repeats_until_cancelled() {
        let scheduler = Scheduler::new(1);
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        let (_id, cancel) = scheduler.schedule(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            ScheduleOptions { delay: Duration::from_millis(5), repeat: Some(Duration::from_millis(5)), strand: 0 },
        );

        std::thread::sleep(Duration::from_millis(30));
        cancel.cancel();
        let seen_just_after_cancel = count.load(Ordering::SeqCst);
        assert!(seen_just_after_cancel >= 2);

        std::thread::sleep(Duration::from_millis(30));
        // A repeat already in flight when cancelled may still fire once
        // more, but no further reschedules happen after that: the count
        // must have stopped growing well before this second sleep ends.
        let seen_after_second_sleep = count.load(Ordering::SeqCst);
        assert!(seen_after_second_sleep <= seen_just_after_cancel + 1);

        scheduler.shutdown();
    }

    #[test]
    fn strand_jobs_share_a_worker() {
        let scheduler = Scheduler::new(4);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = order.clone();
            scheduler.schedule(
                move || {
                    order.lock().expect("lock is poisoned").push(i);
                },
                ScheduleOptions { delay: Duration::from_millis(1), strand: 7, ..Default::default() },
            );
        }

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(5, order.lock().expect("lock is poisoned").len());
        scheduler.shutdown();
    }
}
