//! Lifecycle notifications for acceptors.
//!
//! Listeners are sorted by [`LifeCycleListener::sort_index`] (lowest first) and
//! called on the thread that binds or unbinds the acceptor.

use crate::error::Error;

use std::time::Instant;
use tracing::{error, info};

/// Facts about the acceptor a listener is notified about.
#[derive(Clone, Copy, Debug)]
pub struct LifeCycleContext {
    pub port: u16,
    pub started_at: Instant,
}

impl LifeCycleContext {
    /// Hours elapsed since the acceptor started.
    pub fn uptime_hours(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64() / 3600.0
    }
}

pub trait LifeCycleListener: Send + Sync {
    fn sort_index(&self) -> i32 {
        0
    }

    fn started(&self, _context: &LifeCycleContext) {}

    fn stopping(&self, _context: &LifeCycleContext) {}

    fn stopped(&self, _context: &LifeCycleContext) {}

    fn failure(&self, _context: &LifeCycleContext, _error: &Error) {}
}

/// Logs every transition, including the uptime on stop.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingLifeCycleListener;

impl LifeCycleListener for LoggingLifeCycleListener {
    fn sort_index(&self) -> i32 {
        999
    }

    fn started(&self, context: &LifeCycleContext) {
        info!(port = context.port, "Server started");
    }

    fn stopping(&self, context: &LifeCycleContext) {
        info!(port = context.port, "Server stopping");
    }

    fn stopped(&self, context: &LifeCycleContext) {
        info!(
            port = context.port,
            uptime = %format!("{:.3}h", context.uptime_hours()),
            "Server stopped"
        );
    }

    fn failure(&self, context: &LifeCycleContext, err: &Error) {
        error!(port = context.port, error = %err, "Server failure");
    }
}
