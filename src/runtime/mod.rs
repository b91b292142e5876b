//! Executor side of a selector loop.
//!
//! - [`queue`]: Thread-safe FIFO of pending jobs
//! - [`executor`]: Worker thread that drains the queue

mod executor;
mod queue;

pub(crate) use executor::ExecutorEventLoop;
