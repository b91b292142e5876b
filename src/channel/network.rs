use std::time::{Duration, Instant};

/// Two-state stall detector behind `up_network_state` / `down_network_state`.
///
/// The first stall arms a deadline `grace` ahead. A stall observed after that
/// deadline trips the weak flag. Any progress disarms the deadline and clears it.
#[derive(Debug, Default)]
pub(crate) struct NetworkState {
    weak: bool,
    next_check: Option<Instant>,
}

impl NetworkState {
    pub(crate) fn is_weak(&self) -> bool {
        self.weak
    }

    pub(crate) fn up(&mut self) {
        if self.next_check.is_some() {
            self.next_check = None;
            self.weak = false;
        }
    }

    /// Returns true when this call flipped the channel to weak.
    pub(crate) fn down(&mut self, now: Instant, grace: Duration) -> bool {
        match self.next_check {
            Some(_) if self.weak => false,
            Some(deadline) if now > deadline => {
                self.weak = true;
                true
            }
            Some(_) => false,
            None => {
                self.next_check = Some(now + grace);
                false
            }
        }
    }
}
