//! Selector event loops.
//!
//! - [`selector`]: The loop thread and everything it owns
//! - [`handle`]: Cross-thread requests and write dispatch
//! - [`timer`]: Deadlines for deferred work

mod handle;
mod selector;
mod timer;

pub(crate) use handle::{ConnectRequest, LoopShared, Request};
pub(crate) use selector::SelectorLoop;
