//! Per-request lifecycle phases.
//!
//! `Created → Enriching(stage) → Dispatched → Completed → Terminal`.
//! Phases only move forward; a late request to go back (for example a
//! handler lazily resolving a stage after it was dispatched) is ignored.

use parking_lot::Mutex;

use crate::enrich::Stage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Created,
    Enriching(Stage),
    Dispatched,
    Completed,
    Terminal,
}

#[derive(Debug)]
pub struct Lifecycle(Mutex<Phase>);

impl Lifecycle {
    pub fn new() -> Self {
        Self(Mutex::new(Phase::Created))
    }

    pub fn current(&self) -> Phase {
        *self.0.lock()
    }

    /// Moves to `next` if it lies ahead of the current phase.
    pub fn advance(&self, next: Phase) -> bool {
        let mut phase = self.0.lock();
        if next > *phase {
            tracing::trace!(from = ?*phase, to = ?next, "request phase");
            *phase = next;
            true
        } else {
            false
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self { Self::new() }
}
