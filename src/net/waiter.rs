//! One-shot completion signal used by connector closes.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// Resolves once the connector it came from is physically closed.
///
/// Clones observe the same signal.
///
/// # Example
/// ```ignore
/// let waiter = connector.asynchronous_close();
/// if !waiter.wait(Duration::from_secs(1)) {
///     tracing::warn!("connector still closing");
/// }
/// ```
#[derive(Clone, Default)]
pub struct CloseWaiter {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl CloseWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the close as done and releases every waiter.
    pub(crate) fn signal(&self) {
        let (done, ready) = &*self.state;
        *done.lock() = true;
        ready.notify_all();
    }

    pub fn is_done(&self) -> bool {
        *self.state.0.lock()
    }

    /// Blocks until the close completes or `timeout` elapses.
    ///
    /// # Returns
    /// `true` when the close completed in time
    pub fn wait(&self, timeout: Duration) -> bool {
        let (done, ready) = &*self.state;
        let mut done = done.lock();

        if !*done {
            ready.wait_while_for(&mut done, |done| !*done, timeout);
        }

        *done
    }
}

impl std::fmt::Debug for CloseWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseWaiter")
            .field("done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn times_out_until_signalled() {
        let waiter = CloseWaiter::new();
        let start = Instant::now();

        assert!(!waiter.wait(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));

        let signaller = waiter.clone();
        let handle = thread::spawn(move || signaller.signal());

        assert!(waiter.wait(Duration::from_secs(5)));
        handle.join().unwrap();
        assert!(waiter.is_done());
        assert!(!CloseWaiter::new().is_done());
    }
}
