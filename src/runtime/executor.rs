//! Worker thread running handler callbacks for one selector loop.
//!
//! The selector thread never calls application code directly: decoded frames and
//! session events are pushed here as jobs and run in order on a dedicated thread.

use crate::runtime::queue::{Job, JobQueue};

use parking_lot::Mutex;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// Single-threaded executor fed by a [`JobQueue`].
pub(crate) struct ExecutorEventLoop {
    queue: Arc<JobQueue>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutorEventLoop {
    /// Starts the executor thread.
    ///
    /// # Arguments
    /// * `name` - Thread name, derived from the owning selector loop
    pub(crate) fn start(name: String) -> io::Result<Self> {
        let queue = Arc::new(JobQueue::new());

        let thread = {
            let queue = queue.clone();
            thread::Builder::new()
                .name(name)
                .spawn(move || run(&queue))?
        };

        Ok(Self {
            queue,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Queues a job behind every job queued before it.
    pub(crate) fn execute(&self, job: impl FnOnce() + Send + 'static) {
        self.queue.push(Box::new(job));
    }

    /// Number of jobs waiting to run.
    pub(crate) fn backlog(&self) -> usize {
        self.queue.len()
    }

    /// Lets the queued jobs finish, then joins the thread.
    pub(crate) fn shutdown(&self) {
        self.queue.shutdown();

        let Some(thread) = self.thread.lock().take() else {
            return;
        };

        if thread.thread().id() == thread::current().id() {
            return;
        }

        if thread.join().is_err() {
            error!("Executor thread panicked");
        }
    }
}

impl Drop for ExecutorEventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(queue: &JobQueue) {
    debug!("Executor started");

    while let Some(job) = queue.pop() {
        run_job(job);
    }

    debug!("Executor stopped");
}

fn run_job(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("Executor job panicked");
    }
}
