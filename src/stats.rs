//! Session counters.
//!
//! Every launch, stop and bundler invocation in a session is counted, which lets tests check the
//! process-reuse guarantees from the outside.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct SessionStats {
    launched: AtomicUsize,
    stopped: AtomicUsize,
    builds: AtomicUsize,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub launched: usize,
    pub stopped: usize,
    pub builds: usize,
}

impl StatsSnapshot {
    /// Workers launched but not yet stopped.
    pub fn live(&self) -> usize {
        self.launched.saturating_sub(self.stopped)
    }
}

impl SessionStats {
    pub fn record_launch(&self) {
        self.launched.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_stop(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_build(&self) {
        self.builds.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            launched: self.launched.load(Ordering::SeqCst),
            stopped: self.stopped.load(Ordering::SeqCst),
            builds: self.builds.load(Ordering::SeqCst),
        }
    }
}
