use std::cell::Cell;
use std::rc::Rc;
#[cfg(test)]
use std::time::Duration;

use hub_core::{Clock, Millis};

/// Virtual millisecond clock shared by the hub and the simulated board.
///
/// Every sample taken by the hub moves time forward by one millisecond, so a
/// session replays identically regardless of host speed.
#[derive(Clone, Debug, Default)]
pub struct VirtualClock {
    now: Rc<Cell<u64>>,
}

impl VirtualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.now.get()
    }

    #[cfg(test)]
    pub fn advance(&self, by: Duration) {
        let delta = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now.set(self.now.get().saturating_add(delta));
    }
}

impl Clock for VirtualClock {
    type Instant = Millis;

    fn now(&self) -> Millis {
        let now = self.now.get();
        self.now.set(now + 1);
        Millis::from_millis(now)
    }
}
