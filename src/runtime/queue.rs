//! Thread-safe job queue feeding an executor thread.
//!
//! Provides a FIFO queue that the selector loop pushes into and the executor
//! thread blocks on.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Unit of work handed to the executor.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// A FIFO of jobs with a shutdown flag.
///
/// `pop` blocks until a job arrives or shutdown is requested. Jobs queued before
/// the shutdown are still handed out, so a stopping loop finishes its deliveries.
pub(crate) struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    ready: Condvar,
    shutdown: AtomicBool,
}

impl JobQueue {
    pub(crate) fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Enqueues a job and wakes the executor.
    ///
    /// # Arguments
    /// * `job` - The job to run after every job queued before it
    pub(crate) fn push(&self, job: Job) {
        self.jobs.lock().push_back(job);
        self.ready.notify_one();
    }

    /// Dequeues the next job, waiting for one.
    ///
    /// # Returns
    /// `None` once shutdown was requested and the queue is empty
    pub(crate) fn pop(&self) -> Option<Job> {
        let mut jobs = self.jobs.lock();

        loop {
            if let Some(job) = jobs.pop_front() {
                return Some(job);
            }

            if self.is_shutdown() {
                return None;
            }

            self.ready.wait(&mut jobs);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Signals the executor thread to stop once the queue is drained.
    pub(crate) fn shutdown(&self) {
        let _jobs = self.jobs.lock();
        self.shutdown.store(true, Ordering::SeqCst);
        self.ready.notify_all();
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
