//! Per-process and per-thread queue store
//!
//! Every signal number owns a FIFO of queued `Signal` objects plus one bit
//! in the pending bitmap. The bit is set iff the FIFO is non-empty. Quota
//! accounting lives in the process descriptor; this type only keeps the
//! bitmap and the lists consistent.

use alloc::boxed::Box;
use alloc::collections::VecDeque;

use super::constants::*;
use super::types::{SigSet, Signal};

pub struct SignalQueue {
    pending: SigSet,
    /// Indexed by signal number; slot 0 is unused
    lists: Box<[VecDeque<Signal>]>,
}

impl Default for SignalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalQueue {
    pub fn new() -> Self {
        SignalQueue {
            pending: SigSet::empty(),
            lists: (0..=NSIG).map(|_| VecDeque::new()).collect(),
        }
    }

    /// Bitmap of signal numbers with at least one queued instance
    #[inline]
    pub fn pending(&self) -> SigSet {
        self.pending
    }

    #[inline]
    pub fn is_pending(&self, sig: u32) -> bool {
        self.pending.contains(sig)
    }

    /// Number of queued instances of `sig`
    pub fn count(&self, sig: u32) -> usize {
        self.lists.get(sig as usize).map_or(0, VecDeque::len)
    }

    /// Total number of queued instances across all signal numbers
    pub fn len(&self) -> usize {
        self.lists.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Append at the tail of the signal's list and mark it pending
    pub fn push(&mut self, signal: Signal) {
        let sig = signal.signum();
        assert!(is_valid_signal(sig), "invalid signal number {}", sig);
        self.lists[sig as usize].push_back(signal);
        self.pending.add(sig);
    }

    /// Pop the head of the signal's list, clearing the pending bit once empty
    pub fn pop(&mut self, sig: u32) -> Option<Signal> {
        if !is_valid_signal(sig) {
            return None;
        }
        let list = &mut self.lists[sig as usize];
        let signal = list.pop_front()?;
        if list.is_empty() {
            self.pending.remove(sig);
        }
        Some(signal)
    }
}
