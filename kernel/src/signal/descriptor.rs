//! Per-process and per-thread signal descriptors
//!
//! Lock order: the process lock is always taken before a thread lock.
//! Every mutation of a queue, of a thread's blocked mask, of the disposition
//! table or of the alternate stack happens under the process lock, so
//! concurrent raisers and sigaction/sigaltstack callers never observe a
//! half-updated state. Interrupt context never takes these locks; it goes
//! through the deferred ring instead (see `raise_from_irq`).

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crossbeam_queue::ArrayQueue;
use spin::Mutex;

use super::constants::*;
use super::error::{QueueFull, SignalError};
use super::queue::SignalQueue;
use super::types::{AltStack, SigSet, Signal, SignalAction, StackT};
use crate::config::SignalConfig;
use crate::process::{ProcessId, ThreadId};
use crate::sync::Semaphore;

/// Outcome of a successful enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Object appended to the queue
    Queued,
    /// Standard signal already pending; the object was dropped
    Coalesced,
    /// Target thread has been torn down; the object was dropped
    Dropped,
}

/// State saved by `begin_handler` and restored by `end_handler`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HandlerFrame {
    /// Blocked mask in force before the handler
    pub saved_mask: SigSet,
    /// `(base, size)` of the alternate stack, if the handler runs on it
    pub altstack: Option<(u64, usize)>,
}

/// Signal raised from interrupt context, waiting for the next flush
struct Deferred {
    thread: Option<Arc<ThreadSignals>>,
    signal: Signal,
}

struct ThreadSignalState {
    queue: SignalQueue,
    blocked: SigSet,
    /// Set once the thread is torn down; nothing is queued on it afterwards
    exited: bool,
}

/// Per-thread signal descriptor
pub struct ThreadSignals {
    pid: ProcessId,
    tid: ThreadId,
    state: Mutex<ThreadSignalState>,
    /// Posted by a sigwait-style collaborator; unused by delivery
    pending_semaphore: Semaphore,
    /// Posted by a sigwait-style collaborator; unused by delivery
    deliver_semaphore: Semaphore,
}

impl ThreadSignals {
    pub fn new(pid: ProcessId, tid: ThreadId) -> Self {
        ThreadSignals {
            pid,
            tid,
            state: Mutex::new(ThreadSignalState {
                queue: SignalQueue::new(),
                blocked: SigSet::empty(),
                exited: false,
            }),
            pending_semaphore: Semaphore::new(0),
            deliver_semaphore: Semaphore::new(0),
        }
    }

    #[inline]
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    #[inline]
    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    /// Current blocked mask
    pub fn blocked(&self) -> SigSet {
        self.state.lock().blocked
    }

    pub fn is_blocked(&self, sig: u32) -> bool {
        self.state.lock().blocked.contains(sig)
    }

    /// Signals pending on this thread's own queue
    pub fn pending(&self) -> SigSet {
        self.state.lock().queue.pending()
    }

    pub fn is_pending(&self, sig: u32) -> bool {
        self.state.lock().queue.is_pending(sig)
    }

    /// Number of queued instances of `sig` on this thread
    pub fn queued(&self, sig: u32) -> usize {
        self.state.lock().queue.count(sig)
    }

    pub fn pending_semaphore(&self) -> &Semaphore {
        &self.pending_semaphore
    }

    pub fn deliver_semaphore(&self) -> &Semaphore {
        &self.deliver_semaphore
    }
}

struct ProcessSignalState {
    queue: SignalQueue,
    queued_count: usize,
    queued_max: usize,
    /// Indexed by signal number; slot 0 is unused
    actions: Box<[SignalAction]>,
    altstack: AltStack,
}

/// Per-process signal descriptor
///
/// Owns the process-wide queue, the quota, the disposition table shared by
/// all threads of the process, and the alternate stack.
pub struct ProcessSignals {
    pid: ProcessId,
    state: Mutex<ProcessSignalState>,
    deferred: ArrayQueue<Deferred>,
}

impl ProcessSignals {
    pub fn new(pid: ProcessId, config: &SignalConfig) -> Self {
        ProcessSignals {
            pid,
            state: Mutex::new(ProcessSignalState {
                queue: SignalQueue::new(),
                queued_count: 0,
                queued_max: config.queued_max,
                actions: (0..=NSIG).map(|_| SignalAction::default()).collect(),
                altstack: AltStack::default(),
            }),
            deferred: ArrayQueue::new(config.deferred_capacity.max(1)),
        }
    }

    #[inline]
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn queued_count(&self) -> usize {
        self.state.lock().queued_count
    }

    pub fn queued_max(&self) -> usize {
        self.state.lock().queued_max
    }

    /// Signals pending process-wide
    pub fn pending(&self) -> SigSet {
        self.state.lock().queue.pending()
    }

    pub fn is_pending(&self, sig: u32) -> bool {
        self.state.lock().queue.is_pending(sig)
    }

    /// Number of process-wide queued instances of `sig`
    pub fn queued(&self, sig: u32) -> usize {
        self.state.lock().queue.count(sig)
    }

    // ------------------------------------------------------------------
    // Enqueue / dequeue protocol
    // ------------------------------------------------------------------

    /// Queue `signal` process-wide (`thread == None`) or on `thread`.
    ///
    /// Fails with `QueueFull` once the process quota is reached, handing the
    /// object back. A standard signal that is already pending on the target
    /// queue is coalesced: the call succeeds and the object is dropped.
    pub fn enqueue(
        &self,
        thread: Option<&ThreadSignals>,
        signal: Signal,
    ) -> Result<Enqueued, QueueFull> {
        let mut state = self.state.lock();
        enqueue_locked(&mut state, self.pid, thread, signal)
    }

    /// Pop the oldest instance of `sig` from the designated queue
    pub fn dequeue(&self, thread: Option<&ThreadSignals>, sig: u32) -> Option<Signal> {
        let mut state = self.state.lock();
        let signal = match thread {
            Some(thread) => {
                assert_eq!(thread.pid, self.pid, "thread does not belong to this process");
                thread.state.lock().queue.pop(sig)?
            }
            None => state.queue.pop(sig)?,
        };
        state.queued_count -= 1;
        Some(signal)
    }

    /// Queue a signal generated by kill/tgkill/sigqueue or a trap.
    ///
    /// A signal the process currently ignores is discarded on generation,
    /// and so are SIGSTOP and SIGCONT: job control is not handled here.
    pub fn raise(&self, thread: Option<&ThreadSignals>, signal: Signal) -> Result<(), SignalError> {
        let sig = signal.signum();
        if sig == SIGSTOP || sig == SIGCONT {
            log::warn!(
                "{} for pid {} not supported, discarded",
                signal_name(sig),
                self.pid.as_u64()
            );
            return Ok(());
        }

        let mut state = self.state.lock();

        if state.actions[sig as usize].ignores(sig) {
            log::debug!(
                "Signal {} ({}) ignored by pid {}, discarded",
                sig,
                signal_name(sig),
                self.pid.as_u64()
            );
            return Ok(());
        }

        match enqueue_locked(&mut state, self.pid, thread, signal) {
            Ok(_) => Ok(()),
            Err(QueueFull(_)) => {
                log::debug!(
                    "Signal {} ({}) for pid {} rejected: queue full ({})",
                    sig,
                    signal_name(sig),
                    self.pid.as_u64(),
                    state.queued_max
                );
                Err(SignalError::Again)
            }
        }
    }

    /// Raise from interrupt context.
    ///
    /// Never takes the process lock: the signal is parked in a bounded
    /// lock-free ring and moved into the queues by `flush_deferred`, which
    /// the delivery engine runs on every re-entry.
    pub fn raise_from_irq(
        &self,
        thread: Option<Arc<ThreadSignals>>,
        signal: Signal,
    ) -> Result<(), SignalError> {
        if let Some(ref thread) = thread {
            assert_eq!(thread.pid, self.pid, "thread does not belong to this process");
        }
        self.deferred
            .push(Deferred { thread, signal })
            .map_err(|_| SignalError::Again)
    }

    /// Move signals parked by `raise_from_irq` into the queues.
    ///
    /// Returns the number of signals queued. Signals that hit the quota are
    /// dropped with a warning; the raiser already got `Ok` from the ring.
    pub fn flush_deferred(&self) -> usize {
        if self.deferred.is_empty() {
            return 0;
        }

        let mut queued = 0;
        let mut state = self.state.lock();
        while let Some(Deferred { thread, signal }) = self.deferred.pop() {
            let sig = signal.signum();
            if sig == SIGSTOP || sig == SIGCONT || state.actions[sig as usize].ignores(sig) {
                continue;
            }
            match enqueue_locked(&mut state, self.pid, thread.as_deref(), signal) {
                Ok(Enqueued::Queued) => queued += 1,
                Ok(Enqueued::Coalesced | Enqueued::Dropped) => {}
                Err(QueueFull(_)) => {
                    log::warn!(
                        "Dropping deferred signal {} ({}) for pid {}: queue full",
                        sig,
                        signal_name(sig),
                        self.pid.as_u64()
                    );
                }
            }
        }
        queued
    }

    /// Number of signals waiting in the interrupt-context ring
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Drop every queued instance of `sig`, process-wide and on `threads`.
    ///
    /// Returns the number of objects released.
    pub fn clear_pending<'a, I>(&self, threads: I, sig: u32) -> usize
    where
        I: IntoIterator<Item = &'a ThreadSignals>,
    {
        let mut state = self.state.lock();
        clear_locked(&mut state, self.pid, threads, sig)
    }

    /// Remove the lowest-numbered deliverable thread-directed signal.
    ///
    /// Used by sigwait-style collaborators.
    pub fn next_pending(&self, thread: &ThreadSignals) -> Option<Signal> {
        (1..=NSIG)
            .filter(|&sig| self.is_deliverable(thread, sig))
            .find_map(|sig| self.dequeue(Some(thread), sig))
    }

    /// sigpending(): union of the thread's and the process's pending sets
    pub fn sigpending(&self, thread: &ThreadSignals) -> SigSet {
        let state = self.state.lock();
        let thread_pending = thread.state.lock().queue.pending();
        state.queue.pending() | thread_pending
    }

    // ------------------------------------------------------------------
    // Dispositions
    // ------------------------------------------------------------------

    /// Snapshot of the disposition of `sig`
    pub fn action(&self, sig: u32) -> SignalAction {
        assert!(is_valid_signal(sig), "invalid signal number {}", sig);
        self.state.lock().actions[sig as usize]
    }

    /// True if the process ignores `sig`, explicitly or by default action
    pub fn ignores(&self, sig: u32) -> bool {
        is_valid_signal(sig) && self.state.lock().actions[sig as usize].ignores(sig)
    }

    /// sigaction(): install a new disposition and return the previous one.
    ///
    /// Setting a disposition that ignores the signal discards instances
    /// already pending on the process and on `threads`.
    pub fn set_action<'a, I>(
        &self,
        threads: I,
        sig: u32,
        action: SignalAction,
    ) -> Result<SignalAction, SignalError>
    where
        I: IntoIterator<Item = &'a ThreadSignals>,
    {
        if !is_valid_signal(sig) {
            log::warn!("set_action: invalid signal number {}", sig);
            return Err(SignalError::InvalidArgument);
        }
        if !is_catchable(sig) {
            log::warn!(
                "set_action: cannot set handler for {} (uncatchable)",
                signal_name(sig)
            );
            return Err(SignalError::InvalidArgument);
        }
        if (action.flags & !SA_KNOWN_FLAGS) != 0 {
            log::warn!("set_action: unknown flags {:#x}", action.flags);
            return Err(SignalError::InvalidArgument);
        }

        let sanitized = SignalAction {
            mask: action.mask.catchable(),
            ..action
        };

        let mut state = self.state.lock();
        let old = core::mem::replace(&mut state.actions[sig as usize], sanitized);
        // Discard under the same lock so no raise slips in between
        let released = if sanitized.ignores(sig) {
            clear_locked(&mut state, self.pid, threads, sig)
        } else {
            0
        };
        drop(state);

        log::debug!(
            "Signal {} ({}) handler set to {:#x} flags {:#x} for pid {}",
            sig,
            signal_name(sig),
            sanitized.handler.as_raw(),
            sanitized.flags,
            self.pid.as_u64()
        );

        if released > 0 {
            log::debug!("Discarded {} pending instance(s) of signal {}", released, sig);
        }

        Ok(old)
    }

    /// Reset the disposition of `sig` to SIG_DFL
    pub fn reset_action(&self, sig: u32) {
        assert!(is_valid_signal(sig), "invalid signal number {}", sig);
        self.state.lock().actions[sig as usize] = SignalAction::default();
    }

    /// Reset dispositions for exec: handlers go back to SIG_DFL, SIG_IGN
    /// stays, and the alternate stack is dropped.
    pub fn exec_reset(&self) {
        let mut state = self.state.lock();
        for action in state.actions.iter_mut() {
            if action.is_user_handler() {
                *action = SignalAction::default();
            }
        }
        state.altstack = AltStack::default();
    }

    // ------------------------------------------------------------------
    // Blocked masks
    // ------------------------------------------------------------------

    /// A signal is deliverable to `thread` if the thread does not block it
    /// and the process does not ignore it.
    pub fn is_deliverable(&self, thread: &ThreadSignals, sig: u32) -> bool {
        let state = self.state.lock();
        let blocked = thread.state.lock().blocked;
        !blocked.contains(sig) && !state.actions[sig as usize].ignores(sig)
    }

    /// sigprocmask(): change `thread`'s blocked mask, returning the old one
    pub fn sigprocmask(
        &self,
        thread: &ThreadSignals,
        how: i32,
        set: SigSet,
    ) -> Result<SigSet, SignalError> {
        assert_eq!(thread.pid, self.pid, "thread does not belong to this process");
        let _state = self.state.lock();
        let mut ts = thread.state.lock();
        let old = ts.blocked;
        ts.blocked = match how {
            SIG_BLOCK => old.union(set),
            SIG_UNBLOCK => old.difference(set),
            SIG_SETMASK => set,
            _ => {
                log::warn!("sigprocmask: invalid 'how' value {}", how);
                return Err(SignalError::InvalidArgument);
            }
        }
        .catchable();
        Ok(old)
    }

    /// Enter a handler: apply its mask to `thread` and, if the action asks
    /// for it and the stack is enabled, switch to the alternate stack.
    pub(crate) fn begin_handler(
        &self,
        thread: &ThreadSignals,
        sig: u32,
        action: &SignalAction,
    ) -> HandlerFrame {
        let mut state = self.state.lock();
        let mut ts = thread.state.lock();
        let saved_mask = ts.blocked;
        ts.blocked |= action.mask.catchable();
        if !action.has_flag(SA_NODEFER) {
            ts.blocked.add(sig);
        }
        ts.blocked = ts.blocked.catchable();

        let altstack = if action.has_flag(SA_ONSTACK) && !state.altstack.is_disabled() {
            state.altstack.enter();
            Some((state.altstack.base(), state.altstack.size()))
        } else {
            None
        };

        HandlerFrame {
            saved_mask,
            altstack,
        }
    }

    /// Leave a handler entered with `begin_handler`.
    ///
    /// SA_RESETHAND is taken from the disposition installed now, not the one
    /// the handler was entered with, so a handler that reinstalls itself
    /// keeps its new disposition.
    pub(crate) fn end_handler(&self, thread: &ThreadSignals, sig: u32, frame: HandlerFrame) {
        let mut state = self.state.lock();
        thread.state.lock().blocked = frame.saved_mask;
        if frame.altstack.is_some() {
            state.altstack.leave();
        }
        if state.actions[sig as usize].has_flag(SA_RESETHAND) {
            state.actions[sig as usize] = SignalAction::default();
        }
    }

    // ------------------------------------------------------------------
    // Alternate stack
    // ------------------------------------------------------------------

    /// sigaltstack(): query and optionally replace the alternate stack
    pub fn set_altstack(&self, new: Option<&StackT>) -> Result<StackT, SignalError> {
        let mut state = self.state.lock();
        let old = state.altstack.to_stack_t();

        let Some(new) = new else {
            return Ok(old);
        };

        if state.altstack.is_on_stack() {
            log::warn!("sigaltstack: alternate stack in use by pid {}", self.pid.as_u64());
            return Err(SignalError::PermissionDenied);
        }

        let flags = new.ss_flags as u32 & !SS_AUTODISARM;
        if flags == SS_DISABLE {
            state.altstack = AltStack::default();
            return Ok(old);
        }
        if flags != 0 {
            log::warn!("sigaltstack: invalid flags {:#x}", new.ss_flags);
            return Err(SignalError::InvalidArgument);
        }
        if new.ss_size < MINSIGSTKSZ {
            return Err(SignalError::NoMemory);
        }
        if new.ss_sp == 0 {
            return Err(SignalError::InvalidArgument);
        }
        if new.ss_sp.checked_add(new.ss_size as u64).is_none() {
            log::warn!(
                "sigaltstack: stack {:#x}+{:#x} wraps the address space",
                new.ss_sp,
                new.ss_size
            );
            return Err(SignalError::InvalidArgument);
        }

        state.altstack = AltStack::new(new.ss_sp, new.ss_size);
        Ok(old)
    }

    /// Current alternate stack configuration
    pub fn altstack(&self) -> StackT {
        self.state.lock().altstack.to_stack_t()
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Release everything queued on the process, including the deferred ring
    pub(crate) fn drain(&self) -> usize {
        let mut released = 0;
        while self.deferred.pop().is_some() {
            released += 1;
        }
        for sig in 1..=NSIG {
            while self.dequeue(None, sig).is_some() {
                released += 1;
            }
        }
        released
    }

    /// Release everything queued on `thread`, including its entries in the
    /// deferred ring, and refuse further signals for it.
    pub(crate) fn drain_thread(&self, thread: &ThreadSignals) -> usize {
        assert_eq!(thread.pid, self.pid, "thread does not belong to this process");
        let mut state = self.state.lock();
        let mut released = 0;
        {
            let mut ts = thread.state.lock();
            ts.exited = true;
            for sig in 1..=NSIG {
                while ts.queue.pop(sig).is_some() {
                    released += 1;
                }
            }
        }
        state.queued_count -= released;
        drop(state);

        released + self.purge_deferred(thread.tid)
    }

    /// Drop ring entries aimed at `tid`, keeping the others in order
    fn purge_deferred(&self, tid: ThreadId) -> usize {
        let mut kept = Vec::with_capacity(self.deferred.len());
        let mut purged = 0;
        while let Some(entry) = self.deferred.pop() {
            match entry.thread {
                Some(ref thread) if thread.tid == tid => purged += 1,
                _ => kept.push(entry),
            }
        }
        for entry in kept {
            if let Err(entry) = self.deferred.push(entry) {
                log::warn!(
                    "Dropping deferred signal {} for pid {}: ring refilled during teardown",
                    entry.signal.signum(),
                    self.pid.as_u64()
                );
            }
        }
        purged
    }
}

fn clear_locked<'a, I>(
    state: &mut ProcessSignalState,
    pid: ProcessId,
    threads: I,
    sig: u32,
) -> usize
where
    I: IntoIterator<Item = &'a ThreadSignals>,
{
    let mut released = 0;
    while state.queue.pop(sig).is_some() {
        released += 1;
    }
    for thread in threads {
        assert_eq!(thread.pid, pid, "thread does not belong to this process");
        let mut ts = thread.state.lock();
        while ts.queue.pop(sig).is_some() {
            released += 1;
        }
    }
    state.queued_count -= released;
    released
}

fn enqueue_locked(
    state: &mut ProcessSignalState,
    pid: ProcessId,
    thread: Option<&ThreadSignals>,
    signal: Signal,
) -> Result<Enqueued, QueueFull> {
    if state.queued_count >= state.queued_max {
        return Err(QueueFull(signal));
    }

    let sig = signal.signum();
    match thread {
        Some(thread) => {
            assert_eq!(thread.pid, pid, "thread does not belong to this process");
            let mut ts = thread.state.lock();
            if ts.exited {
                log::debug!(
                    "Dropping signal {} for exited tid {}",
                    sig,
                    thread.tid.as_u64()
                );
                return Ok(Enqueued::Dropped);
            }
            // Standard signals can be queued once
            if !is_realtime(sig) && ts.queue.is_pending(sig) {
                return Ok(Enqueued::Coalesced);
            }
            log::debug!(
                "Queueing signal {} for tid {} (pid {})",
                sig,
                thread.tid.as_u64(),
                pid.as_u64()
            );
            ts.queue.push(signal);
        }
        None => {
            if !is_realtime(sig) && state.queue.is_pending(sig) {
                return Ok(Enqueued::Coalesced);
            }
            log::debug!("Queueing signal {} for pid {}", sig, pid.as_u64());
            state.queue.push(signal);
        }
    }

    state.queued_count += 1;
    Ok(Enqueued::Queued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::types::{SigHandler, SigInfo};

    fn new_process(queued_max: usize) -> ProcessSignals {
        ProcessSignals::new(
            ProcessId::new(1),
            &SignalConfig::default().with_queued_max(queued_max),
        )
    }

    fn thread(tid: u64) -> ThreadSignals {
        ThreadSignals::new(ProcessId::new(1), ThreadId::new(tid))
    }

    #[test]
    fn test_standard_signal_coalesces_on_thread() {
        let process = new_process(8);
        let t = thread(10);
        assert_eq!(process.enqueue(Some(&t), Signal::user(SIGUSR1)).unwrap(), Enqueued::Queued);
        for _ in 0..4 {
            assert_eq!(
                process.enqueue(Some(&t), Signal::user(SIGUSR1)).unwrap(),
                Enqueued::Coalesced
            );
        }
        assert_eq!(t.queued(SIGUSR1), 1);
        assert_eq!(process.queued_count(), 1);
        assert!(t.is_pending(SIGUSR1));
    }

    #[test]
    fn test_standard_signal_coalesces_on_process() {
        let process = new_process(8);
        process.enqueue(None, Signal::user(SIGTERM)).unwrap();
        process.enqueue(None, Signal::user(SIGTERM)).unwrap();
        assert_eq!(process.queued(SIGTERM), 1);
        assert_eq!(process.queued_count(), 1);
    }

    #[test]
    fn test_realtime_signals_accumulate_in_fifo_order() {
        let process = new_process(8);
        let t = thread(10);
        for value in 0..5 {
            process.enqueue(Some(&t), Signal::new(SIGRTMIN + 2, SigInfo::queued(0, value)))
                .unwrap();
        }
        assert_eq!(t.queued(SIGRTMIN + 2), 5);
        for value in 0..5 {
            let sig = process.dequeue(Some(&t), SIGRTMIN + 2).unwrap();
            assert_eq!(sig.info().value, value);
        }
        assert!(!t.is_pending(SIGRTMIN + 2));
        assert_eq!(process.queued_count(), 0);
    }

    #[test]
    fn test_backpressure_returns_signal_without_mutation() {
        let process = new_process(3);
        for _ in 0..3 {
            process.enqueue(None, Signal::user(SIGRTMIN)).unwrap();
        }
        let err = process
            .enqueue(None, Signal::new(SIGRTMIN, SigInfo::queued(0, 99)))
            .unwrap_err();
        assert_eq!(err.0.info().value, 99);
        assert_eq!(process.queued(SIGRTMIN), 3);
        assert_eq!(process.queued_count(), 3);
    }

    #[test]
    fn test_quota_is_checked_before_coalescing() {
        let process = new_process(1);
        process.enqueue(None, Signal::user(SIGUSR1)).unwrap();
        assert!(process.enqueue(None, Signal::user(SIGUSR1)).is_err());
    }

    #[test]
    fn test_raise_maps_quota_to_again() {
        let process = new_process(1);
        process.raise(None, Signal::user(SIGRTMIN)).unwrap();
        assert_eq!(process.raise(None, Signal::user(SIGRTMIN)), Err(SignalError::Again));
    }

    #[test]
    fn test_raise_discards_ignored_signal() {
        let process = new_process(4);
        process.raise(None, Signal::user(SIGCHLD)).unwrap();
        assert!(!process.is_pending(SIGCHLD));
        process.set_action(core::iter::empty(), SIGUSR1, SignalAction::ignore())
            .unwrap();
        process.raise(None, Signal::user(SIGUSR1)).unwrap();
        assert_eq!(process.queued_count(), 0);
    }

    #[test]
    fn test_raise_discards_job_control() {
        let process = new_process(4);
        let t = thread(1);
        process.raise(None, Signal::user(SIGSTOP)).unwrap();
        process.raise(Some(&t), Signal::user(SIGCONT)).unwrap();
        assert!(!process.is_pending(SIGSTOP));
        assert!(!t.is_pending(SIGCONT));
        assert_eq!(process.queued_count(), 0);
    }

    #[test]
    fn test_dequeue_empty_is_none() {
        let process = new_process(4);
        let t = thread(2);
        assert!(process.dequeue(None, SIGUSR1).is_none());
        assert!(process.dequeue(Some(&t), SIGUSR1).is_none());
        assert_eq!(process.queued_count(), 0);
    }

    #[test]
    fn test_set_action_rejects_uncatchable() {
        let process = new_process(4);
        let action = SignalAction::handler(0x1000, 0);
        assert_eq!(
            process.set_action(core::iter::empty(), SIGKILL, action),
            Err(SignalError::InvalidArgument)
        );
        assert_eq!(
            process.set_action(core::iter::empty(), SIGSTOP, action),
            Err(SignalError::InvalidArgument)
        );
        assert_eq!(
            process.set_action(core::iter::empty(), 0, action),
            Err(SignalError::InvalidArgument)
        );
    }

    #[test]
    fn test_set_action_sanitizes_mask_and_returns_old() {
        let process = new_process(4);
        let mut action = SignalAction::handler(0x2000, SA_SIGINFO);
        action.mask = SigSet::single(SIGKILL) | SigSet::single(SIGUSR2);
        let old = process.set_action(core::iter::empty(), SIGUSR1, action).unwrap();
        assert!(old.is_default());
        let now = process.action(SIGUSR1);
        assert_eq!(now.handler, SigHandler::User(0x2000));
        assert_eq!(now.mask, SigSet::single(SIGUSR2));
    }

    #[test]
    fn test_set_ignore_discards_pending() {
        let process = new_process(8);
        let t = thread(3);
        process.enqueue(None, Signal::user(SIGUSR2)).unwrap();
        process.enqueue(Some(&t), Signal::user(SIGUSR2)).unwrap();
        process.set_action([&t], SIGUSR2, SignalAction::ignore()).unwrap();
        assert!(!process.is_pending(SIGUSR2));
        assert!(!t.is_pending(SIGUSR2));
        assert_eq!(process.queued_count(), 0);
    }

    #[test]
    fn test_set_ignore_leaves_quota_consistent() {
        let process = new_process(3);
        let a = thread(1);
        let b = thread(2);
        process.enqueue(None, Signal::user(SIGRTMIN)).unwrap();
        process.enqueue(Some(&a), Signal::user(SIGRTMIN)).unwrap();
        process.enqueue(Some(&b), Signal::user(SIGRTMIN + 1)).unwrap();
        assert_eq!(process.queued_count(), 3);

        process.set_action([&a, &b], SIGRTMIN, SignalAction::ignore()).unwrap();
        assert_eq!(process.queued_count(), 1);
        assert_eq!(process.queued(SIGRTMIN), 0);
        assert_eq!(a.queued(SIGRTMIN), 0);
        assert_eq!(b.queued(SIGRTMIN + 1), 1);

        // Ignored now, so raising it again is a no-op that costs no quota
        process.raise(Some(&a), Signal::user(SIGRTMIN)).unwrap();
        assert_eq!(process.queued_count(), 1);
        process.enqueue(None, Signal::user(SIGRTMIN + 2)).unwrap();
        process.enqueue(None, Signal::user(SIGRTMIN + 2)).unwrap();
        assert_eq!(process.queued_count(), 3);
    }

    #[test]
    fn test_clear_pending_drains_process_and_threads() {
        let process = new_process(16);
        let a = thread(1);
        let b = thread(2);
        for _ in 0..3 {
            process.enqueue(None, Signal::user(SIGRTMIN)).unwrap();
        }
        process.enqueue(Some(&a), Signal::user(SIGRTMIN)).unwrap();
        process.enqueue(Some(&b), Signal::user(SIGRTMIN)).unwrap();
        process.enqueue(Some(&b), Signal::user(SIGUSR1)).unwrap();
        assert_eq!(process.clear_pending([&a, &b], SIGRTMIN), 5);
        assert_eq!(process.queued_count(), 1);
        assert!(b.is_pending(SIGUSR1));
    }

    #[test]
    fn test_sigprocmask_never_blocks_kill_or_stop() {
        let process = new_process(4);
        let t = thread(1);
        let set = SigSet::single(SIGKILL) | SigSet::single(SIGSTOP) | SigSet::single(SIGINT);
        let old = process.sigprocmask(&t, SIG_BLOCK, set).unwrap();
        assert!(old.is_empty());
        assert_eq!(t.blocked(), SigSet::single(SIGINT));
        process.sigprocmask(&t, SIG_UNBLOCK, SigSet::single(SIGINT)).unwrap();
        assert!(t.blocked().is_empty());
        process.sigprocmask(&t, SIG_SETMASK, SigSet::single(SIGHUP)).unwrap();
        assert_eq!(t.blocked(), SigSet::single(SIGHUP));
        assert_eq!(
            process.sigprocmask(&t, 7, SigSet::empty()),
            Err(SignalError::InvalidArgument)
        );
    }

    #[test]
    fn test_is_deliverable() {
        let process = new_process(4);
        let t = thread(1);
        assert!(process.is_deliverable(&t, SIGUSR1));
        process.sigprocmask(&t, SIG_BLOCK, SigSet::single(SIGUSR1)).unwrap();
        assert!(!process.is_deliverable(&t, SIGUSR1));
        process.set_action(core::iter::empty(), SIGUSR2, SignalAction::ignore())
            .unwrap();
        assert!(!process.is_deliverable(&t, SIGUSR2));
        assert!(!process.is_deliverable(&t, SIGCHLD));
    }

    #[test]
    fn test_next_pending_picks_lowest_deliverable() {
        let process = new_process(8);
        let t = thread(1);
        process.enqueue(Some(&t), Signal::user(SIGTERM)).unwrap();
        process.enqueue(Some(&t), Signal::user(SIGHUP)).unwrap();
        process.sigprocmask(&t, SIG_BLOCK, SigSet::single(SIGHUP)).unwrap();
        assert_eq!(process.next_pending(&t).map(|s| s.signum()), Some(SIGTERM));
        assert!(process.next_pending(&t).is_none());
        assert!(t.is_pending(SIGHUP));
    }

    #[test]
    fn test_sigpending_is_union() {
        let process = new_process(8);
        let t = thread(1);
        process.enqueue(None, Signal::user(SIGINT)).unwrap();
        process.enqueue(Some(&t), Signal::user(SIGALRM)).unwrap();
        assert_eq!(
            process.sigpending(&t),
            SigSet::single(SIGINT) | SigSet::single(SIGALRM)
        );
    }

    #[test]
    fn test_handler_mask_nodefer_and_resethand() {
        let process = new_process(4);
        let t = thread(1);
        let mut action = SignalAction::handler(0x3000, SA_RESETHAND);
        action.mask = SigSet::single(SIGUSR2);
        process.set_action(core::iter::empty(), SIGUSR1, action).unwrap();

        let frame = process.begin_handler(&t, SIGUSR1, &action);
        assert!(frame.saved_mask.is_empty());
        assert_eq!(frame.altstack, None);
        assert_eq!(t.blocked(), SigSet::single(SIGUSR1) | SigSet::single(SIGUSR2));
        process.end_handler(&t, SIGUSR1, frame);
        assert!(t.blocked().is_empty());
        assert!(process.action(SIGUSR1).is_default());

        let nodefer = SignalAction::handler(0x3000, SA_NODEFER);
        let frame = process.begin_handler(&t, SIGUSR1, &nodefer);
        assert!(!t.is_blocked(SIGUSR1));
        process.end_handler(&t, SIGUSR1, frame);
    }

    #[test]
    fn test_resethand_spares_disposition_replaced_by_handler() {
        let process = new_process(4);
        let t = thread(1);
        let oneshot = SignalAction::handler(0x3000, SA_RESETHAND);
        process.set_action(core::iter::empty(), SIGUSR1, oneshot).unwrap();

        let frame = process.begin_handler(&t, SIGUSR1, &oneshot);
        // The handler installs a persistent disposition before returning
        let persistent = SignalAction::handler(0x3100, 0);
        process.set_action([&t], SIGUSR1, persistent).unwrap();
        process.end_handler(&t, SIGUSR1, frame);

        assert_eq!(process.action(SIGUSR1).handler, SigHandler::User(0x3100));
    }

    #[test]
    fn test_begin_handler_claims_altstack_with_mask() {
        let process = new_process(4);
        let t = thread(1);
        let stack = StackT { ss_sp: 0x8000, ss_flags: 0, _pad: 0, ss_size: 0x4000 };
        process.set_altstack(Some(&stack)).unwrap();

        let onstack = SignalAction::handler(0x1000, SA_ONSTACK);
        let frame = process.begin_handler(&t, SIGSEGV, &onstack);
        assert_eq!(frame.altstack, Some((0x8000, 0x4000)));
        assert!(t.is_blocked(SIGSEGV));
        assert_eq!(process.altstack().ss_flags, SS_ONSTACK as i32);

        process.end_handler(&t, SIGSEGV, frame);
        assert!(t.blocked().is_empty());
        assert_eq!(process.altstack().ss_flags, 0);

        // Without SA_ONSTACK the stack is left alone
        let plain = SignalAction::handler(0x1000, 0);
        let frame = process.begin_handler(&t, SIGSEGV, &plain);
        assert_eq!(frame.altstack, None);
        assert_eq!(process.altstack().ss_flags, 0);
        process.end_handler(&t, SIGSEGV, frame);
    }

    #[test]
    fn test_altstack_configuration() {
        let process = new_process(4);
        assert_eq!(process.altstack(), StackT::default());

        let small = StackT { ss_sp: 0x8000, ss_flags: 0, _pad: 0, ss_size: 16 };
        assert_eq!(process.set_altstack(Some(&small)), Err(SignalError::NoMemory));

        let bad = StackT { ss_sp: 0x8000, ss_flags: 0x40, _pad: 0, ss_size: 0x4000 };
        assert_eq!(process.set_altstack(Some(&bad)), Err(SignalError::InvalidArgument));

        let good = StackT { ss_sp: 0x8000, ss_flags: 0, _pad: 0, ss_size: 0x4000 };
        process.set_altstack(Some(&good)).unwrap();
        assert_eq!(process.altstack().ss_sp, 0x8000);
        assert_eq!(process.altstack().ss_flags, 0);

        let t = thread(1);
        let onstack = SignalAction::handler(0x1000, SA_ONSTACK);
        let frame = process.begin_handler(&t, SIGUSR1, &onstack);
        assert_eq!(frame.altstack, Some((0x8000, 0x4000)));
        assert_eq!(process.altstack().ss_flags, SS_ONSTACK as i32);
        assert_eq!(
            process.set_altstack(Some(&StackT::default())),
            Err(SignalError::PermissionDenied)
        );
        process.end_handler(&t, SIGUSR1, frame);

        process.set_altstack(Some(&StackT::default())).unwrap();
        let frame = process.begin_handler(&t, SIGUSR1, &onstack);
        assert_eq!(frame.altstack, None);
        process.end_handler(&t, SIGUSR1, frame);
    }

    #[test]
    fn test_altstack_rejects_wrapping_range() {
        let process = new_process(4);
        let wraps = StackT {
            ss_sp: u64::MAX - 0xfff,
            ss_flags: 0,
            _pad: 0,
            ss_size: 0x4000,
        };
        assert_eq!(
            process.set_altstack(Some(&wraps)),
            Err(SignalError::InvalidArgument)
        );
        assert_eq!(process.altstack(), StackT::default());

        let top = StackT {
            ss_sp: u64::MAX - 0x4fff,
            ss_flags: 0,
            _pad: 0,
            ss_size: 0x4000,
        };
        process.set_altstack(Some(&top)).unwrap();
        assert_eq!(process.altstack().ss_sp, u64::MAX - 0x4fff);
    }

    #[test]
    fn test_exec_reset_keeps_ignore() {
        let process = new_process(4);
        process.set_action(core::iter::empty(), SIGUSR1, SignalAction::handler(0x1000, 0))
            .unwrap();
        process.set_action(core::iter::empty(), SIGUSR2, SignalAction::ignore())
            .unwrap();
        process.exec_reset();
        assert!(process.action(SIGUSR1).is_default());
        assert!(process.action(SIGUSR2).is_ignore());
    }

    #[test]
    fn test_deferred_raise_is_flushed() {
        let process = ProcessSignals::new(
            ProcessId::new(1),
            &SignalConfig::default().with_deferred_capacity(2),
        );
        let t = Arc::new(thread(4));
        process.raise_from_irq(None, Signal::user(SIGALRM)).unwrap();
        process.raise_from_irq(Some(t.clone()), Signal::user(SIGSEGV)).unwrap();
        assert_eq!(
            process.raise_from_irq(None, Signal::user(SIGIO)),
            Err(SignalError::Again)
        );
        assert!(!process.is_pending(SIGALRM));
        assert_eq!(process.flush_deferred(), 2);
        assert!(process.is_pending(SIGALRM));
        assert!(t.is_pending(SIGSEGV));
        assert_eq!(process.deferred_len(), 0);
    }

    #[test]
    fn test_flush_drops_over_quota() {
        let process = ProcessSignals::new(
            ProcessId::new(1),
            &SignalConfig::default().with_queued_max(1),
        );
        process.raise_from_irq(None, Signal::user(SIGRTMIN)).unwrap();
        process.raise_from_irq(None, Signal::user(SIGRTMIN)).unwrap();
        assert_eq!(process.flush_deferred(), 1);
        assert_eq!(process.queued_count(), 1);
    }

    #[test]
    fn test_drained_thread_refuses_signals() {
        let process = new_process(4);
        let t = Arc::new(thread(6));
        let other = Arc::new(thread(7));
        process.enqueue(Some(t.as_ref()), Signal::user(SIGUSR1)).unwrap();
        process.raise_from_irq(Some(t.clone()), Signal::user(SIGUSR2)).unwrap();
        process.raise_from_irq(Some(other.clone()), Signal::user(SIGUSR2)).unwrap();
        assert_eq!(Arc::strong_count(&t), 2);

        assert_eq!(process.drain_thread(&t), 2);
        assert_eq!(process.queued_count(), 0);
        assert_eq!(process.deferred_len(), 1);
        assert_eq!(Arc::strong_count(&t), 1);

        assert!(matches!(
            process.enqueue(Some(t.as_ref()), Signal::user(SIGUSR1)),
            Ok(Enqueued::Dropped)
        ));
        process.raise_from_irq(Some(t.clone()), Signal::user(SIGRTMIN)).unwrap();
        assert_eq!(process.flush_deferred(), 1);
        assert_eq!(process.queued_count(), 1);
        assert!(other.is_pending(SIGUSR2));
        assert!(!t.is_pending(SIGRTMIN));
    }

    #[test]
    #[should_panic(expected = "thread does not belong to this process")]
    fn test_foreign_thread_is_rejected() {
        let process = new_process(4);
        let foreign = ThreadSignals::new(ProcessId::new(2), ThreadId::new(1));
        let _ = process.enqueue(Some(&foreign), Signal::user(SIGUSR1));
    }
}
