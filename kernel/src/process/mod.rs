//! Process and thread registry seam
//!
//! Processes and threads are created, tracked and destroyed by the host
//! kernel's registry. The signal core only needs ids, lookups of the signal
//! descriptors the registry stores, and the ability to end a process.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::signal::{ProcessSignals, ThreadSignals};

/// Process ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u64);

impl ProcessId {
    pub const fn new(id: u64) -> Self {
        ProcessId(id)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Thread ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    pub const fn new(id: u64) -> Self {
        ThreadId(id)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Scheduling state of a thread, as reported by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Thread is currently running on CPU
    Running,
    /// Thread is ready to run and in scheduler queue
    Ready,
    /// Thread is blocked waiting for something
    Blocked,
    /// Thread is blocked waiting for a signal (pause/sigsuspend/sigwait)
    BlockedOnSignal,
    /// Thread has terminated
    Terminated,
}

impl ThreadState {
    /// Thread-directed signals are only delivered in these states
    pub fn accepts_signals(self) -> bool {
        matches!(self, ThreadState::Running | ThreadState::BlockedOnSignal)
    }
}

/// Lookups the signal core needs from the host's process registry.
pub trait ProcessRegistry {
    /// Process of the thread currently executing
    fn current_pid(&self) -> ProcessId;

    /// Thread currently executing
    fn current_tid(&self) -> ThreadId;

    /// Signal descriptor of a live process
    fn process(&self, pid: ProcessId) -> Option<Arc<ProcessSignals>>;

    /// Signal descriptor of a live thread
    fn thread(&self, tid: ThreadId) -> Option<Arc<ThreadSignals>>;

    /// Signal descriptors of every thread of `pid`, in thread-list order
    fn threads(&self, pid: ProcessId) -> Vec<Arc<ThreadSignals>>;

    /// Current scheduling state of a thread
    fn thread_state(&self, tid: ThreadId) -> ThreadState;

    /// Terminate the process owning `tid` because of `signum`.
    ///
    /// Never returns to the delivery path.
    fn terminate(&self, tid: ThreadId, signum: u32) -> !;
}
