//! Descriptor lifecycle hooks
//!
//! Called by the host registry when a process or thread object is created
//! or torn down. Teardown drains every queued signal object before the
//! descriptor goes away.

use alloc::sync::Arc;

use super::descriptor::{ProcessSignals, ThreadSignals};
use crate::config::SignalConfig;
use crate::process::{ProcessId, ThreadId};

/// Allocate the signal descriptor of a new process
pub fn process_desc_alloc(pid: ProcessId, config: &SignalConfig) -> Arc<ProcessSignals> {
    log::debug!(
        "signal: process descriptor for pid {} (queued_max={})",
        pid.as_u64(),
        config.queued_max
    );
    Arc::new(ProcessSignals::new(pid, config))
}

/// Allocate the signal descriptor of a new thread of `process`
pub fn thread_desc_alloc(process: &ProcessSignals, tid: ThreadId) -> Arc<ThreadSignals> {
    log::debug!(
        "signal: thread descriptor for tid {} (pid {})",
        tid.as_u64(),
        process.pid().as_u64()
    );
    Arc::new(ThreadSignals::new(process.pid(), tid))
}

/// Tear down a thread descriptor.
///
/// Every signal still queued on the thread, or parked for it in the
/// interrupt ring, is released and its quota returned. Signals raised at
/// the thread afterwards are dropped. Returns the number of objects
/// released.
pub fn thread_desc_free(process: &ProcessSignals, thread: Arc<ThreadSignals>) -> usize {
    let released = process.drain_thread(&thread);
    if released > 0 {
        log::debug!(
            "signal: released {} queued signal(s) of tid {}",
            released,
            thread.tid().as_u64()
        );
    }
    released
}

/// Tear down a process descriptor.
///
/// Drains the process-wide queue and the interrupt-context ring. Thread
/// descriptors must have been freed first.
pub fn process_desc_free(process: Arc<ProcessSignals>) -> usize {
    let released = process.drain();
    if process.queued_count() != 0 {
        log::warn!(
            "signal: pid {} freed with {} thread-queued signal(s) outstanding",
            process.pid().as_u64(),
            process.queued_count()
        );
    }
    if released > 0 {
        log::debug!(
            "signal: released {} queued signal(s) of pid {}",
            released,
            process.pid().as_u64()
        );
    }
    released
}
