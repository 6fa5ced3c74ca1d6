//! Signal subsystem configuration
//!
//! Per-process limits handed to the descriptor when the registry creates a
//! process. Defaults follow POSIX minimums.

use crate::signal::constants::SIGQUEUE_MAX;

/// Default capacity of the interrupt-context raise ring
pub const DEFAULT_DEFERRED_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalConfig {
    /// Maximum number of signal objects queued per process
    pub queued_max: usize,
    /// Slots in the lock-free ring used by `raise_from_irq`
    pub deferred_capacity: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            queued_max: SIGQUEUE_MAX,
            deferred_capacity: DEFAULT_DEFERRED_CAPACITY,
        }
    }
}

impl SignalConfig {
    pub fn with_queued_max(mut self, queued_max: usize) -> Self {
        self.queued_max = queued_max;
        self
    }

    /// A zero capacity is bumped to one; `ArrayQueue` rejects empty rings.
    pub fn with_deferred_capacity(mut self, capacity: usize) -> Self {
        self.deferred_capacity = capacity.max(1);
        self
    }
}
