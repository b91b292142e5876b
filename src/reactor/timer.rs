//! Deferred work for a selector loop.
//!
//! Entries are registered with a deadline and handed back once it has passed.
//! The loop bounds its poll timeout by [`TimerQueue::next_remaining`] so no
//! deadline is observed later than one poll wakeup.

use std::time::{Duration, Instant};

/// Deadline-ordered set of pending entries.
pub(crate) struct TimerQueue<T> {
    timers: Vec<(Instant, T)>,
}

impl<T> TimerQueue<T> {
    pub(crate) fn new() -> Self {
        Self { timers: Vec::new() }
    }

    /// Registers `item` to fire once `deadline` is reached.
    ///
    /// # Arguments
    /// * `deadline` - When the entry becomes due
    /// * `item` - What the loop gets back at that point
    pub(crate) fn register(&mut self, deadline: Instant, item: T) {
        self.timers.push((deadline, item));
    }

    /// Removes and returns every entry due at `now`, earliest first.
    pub(crate) fn expired(&mut self, now: Instant) -> Vec<T> {
        let mut due = Vec::new();
        let mut index = 0;

        while index < self.timers.len() {
            if self.timers[index].0 <= now {
                due.push(self.timers.swap_remove(index));
            } else {
                index += 1;
            }
        }

        due.sort_by_key(|(deadline, _)| *deadline);
        due.into_iter().map(|(_, item)| item).collect()
    }

    /// Returns the time remaining until the next deadline, if any.
    pub(crate) fn next_remaining(&self, now: Instant) -> Option<Duration> {
        self.timers
            .iter()
            .map(|(deadline, _)| deadline.saturating_duration_since(now))
            .min()
    }
}
