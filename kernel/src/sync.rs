//! Non-blocking counting semaphore
//!
//! The thread signal descriptor owns two of these for a sigwait-style
//! collaborator. Nothing in this crate blocks on them.

use core::sync::atomic::{AtomicUsize, Ordering};

pub struct Semaphore {
    count: AtomicUsize,
}

impl Semaphore {
    pub const fn new(initial: usize) -> Self {
        Self {
            count: AtomicUsize::new(initial),
        }
    }

    /// Release one unit
    pub fn up(&self) {
        self.count.fetch_add(1, Ordering::Release);
    }

    /// Take one unit if available
    ///
    /// Returns false instead of waiting when the count is zero.
    pub fn try_down(&self) -> bool {
        let mut current = self.count.load(Ordering::Relaxed);
        while current > 0 {
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}
