//! Bounded worker pool
//!
//! A fixed number of threads pull jobs from a shared queue and report each
//! completion over a channel as soon as it happens. A job that panics is
//! turned into a [`JobFailure`]; its worker carries on with the queue.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, warn};
use woom_source::MAX_POOL_SIZE;

use crate::error::{JobFailure, Stage};

/// Lifecycle of one job; `Succeeded` and `Failed` are final
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Work item run on a pool thread
pub type Task<T> = Box<dyn FnOnce() -> Result<T, JobFailure> + Send + 'static>;

struct QueuedJob<T> {
    index: usize,
    identifier: String,
    task: Task<T>,
}

/// A finished job, in the order jobs finish
pub struct Completion<T> {
    /// Submission index
    pub index: usize,
    pub identifier: String,
    pub result: Result<T, JobFailure>,
}

/// Pool configuration
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    /// `size` is clamped to 1..=8
    pub fn new(size: usize) -> Self {
        Self {
            size: size.clamp(1, MAX_POOL_SIZE),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Start running `jobs`; jobs still queued at `deadline` fail with
    /// [`Stage::Queue`] without running
    pub fn submit<T: Send + 'static>(
        &self,
        jobs: Vec<(String, Task<T>)>,
        deadline: Option<Instant>,
    ) -> io::Result<PoolHandle<T>> {
        let total = jobs.len();
        let (queue_tx, queue_rx) = crossbeam_channel::bounded(total.max(1));
        for (index, (identifier, task)) in jobs.into_iter().enumerate() {
            // Capacity covers every job, so this never blocks
            let _ = queue_tx.send(QueuedJob {
                index,
                identifier,
                task,
            });
        }
        drop(queue_tx);

        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        let states = Arc::new(Mutex::new(vec![JobState::Pending; total]));
        let cancelled = Arc::new(AtomicBool::new(false));

        let thread_count = self.size.min(total);
        let mut workers = Vec::with_capacity(thread_count);
        for n in 0..thread_count {
            let worker = Worker {
                queue: queue_rx.clone(),
                done: done_tx.clone(),
                states: Arc::clone(&states),
                cancelled: Arc::clone(&cancelled),
                deadline,
            };
            let handle = thread::Builder::new()
                .name(format!("woom-worker-{}", n))
                .spawn(move || worker.run())?;
            workers.push(handle);
        }
        drop(done_tx);
        debug!(jobs = total, threads = thread_count, "Pool started");

        Ok(PoolHandle {
            completions: done_rx,
            states,
            cancelled,
            workers,
            total,
        })
    }
}

struct Worker<T> {
    queue: Receiver<QueuedJob<T>>,
    done: Sender<Completion<T>>,
    states: Arc<Mutex<Vec<JobState>>>,
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl<T> Worker<T> {
    fn run(self) {
        while let Ok(job) = self.queue.recv() {
            let QueuedJob {
                index,
                identifier,
                task,
            } = job;

            let result = match self.refusal() {
                Some(reason) => {
                    warn!(job = %identifier, stage = "queue", reason, "Job not started");
                    Err(JobFailure::new(identifier.as_str(), Stage::Queue, reason))
                }
                None => {
                    self.states.lock()[index] = JobState::Running;
                    match panic::catch_unwind(AssertUnwindSafe(task)) {
                        Ok(result) => result,
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            error!(job = %identifier, stage = "worker", %message, "Job panicked");
                            Err(JobFailure::new(identifier.as_str(), Stage::Worker, message))
                        }
                    }
                }
            };

            self.states.lock()[index] = if result.is_ok() {
                JobState::Succeeded
            } else {
                JobState::Failed
            };

            if self
                .done
                .send(Completion {
                    index,
                    identifier,
                    result,
                })
                .is_err()
            {
                break;
            }
        }
    }

    fn refusal(&self) -> Option<&'static str> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Some("batch abandoned");
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some("batch timeout reached"),
            _ => None,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Running batch; dropping it fails queued jobs and waits for running ones
pub struct PoolHandle<T> {
    completions: Receiver<Completion<T>>,
    states: Arc<Mutex<Vec<JobState>>>,
    cancelled: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    total: usize,
}

impl<T> PoolHandle<T> {
    pub fn total(&self) -> usize {
        self.total
    }

    /// Snapshot of every job's state, by submission index
    pub fn states(&self) -> Vec<JobState> {
        self.states.lock().clone()
    }

    /// Block until the next job finishes; `None` once all have
    pub fn next_completion(&self) -> Option<Completion<T>> {
        self.completions.recv().ok()
    }

    /// Fail every job that has not started yet
    pub fn cancel_pending(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl<T> Drop for PoolHandle<T> {
    fn drop(&mut self) {
        self.cancel_pending();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
