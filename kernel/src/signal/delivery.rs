//! Signal delivery to userspace
//!
//! This module delivers pending signals to the running thread when it
//! passes a safe re-entry point (syscall return, trap return). Delivery
//! is synchronous: default actions run on the delivering thread's own
//! stack, user handlers are entered through `SignalArch::jump_to_handler`
//! and return here before the next signal is looked at.

use alloc::sync::Arc;

use super::constants::*;
use super::descriptor::{ProcessSignals, ThreadSignals};
use super::error::SignalError;
use super::types::*;
use crate::arch_impl::{align_down, stack_top, HandlerCall, SignalArch, AUXSP_ALIGN, STACK_ALIGN};
use crate::process::{ProcessId, ProcessRegistry, ThreadId};

/// Raise `signum` on a process, or on one of its threads.
///
/// Entry point for kill/tgkill/sigqueue style callers and for traps.
pub fn raise<R>(
    registry: &R,
    pid: ProcessId,
    tid: Option<ThreadId>,
    signum: u32,
    info: SigInfo,
) -> Result<(), SignalError>
where
    R: ProcessRegistry + ?Sized,
{
    if !is_valid_signal(signum) {
        log::warn!("raise: invalid signal number {}", signum);
        return Err(SignalError::InvalidArgument);
    }

    let process = registry.process(pid).ok_or(SignalError::NoSuchProcess)?;
    let thread = match tid {
        Some(tid) => {
            let thread = registry.thread(tid).ok_or(SignalError::NoSuchProcess)?;
            if thread.pid() != pid {
                log::warn!(
                    "raise: tid {} does not belong to pid {}",
                    tid.as_u64(),
                    pid.as_u64()
                );
                return Err(SignalError::NoSuchProcess);
            }
            Some(thread)
        }
        None => None,
    };

    process.raise(thread.as_deref(), Signal::new(signum, info))
}

/// A signal is deliverable to `thread` if the thread does not mask it and
/// its process does not ignore it.
pub fn is_deliverable<R>(registry: &R, thread: &ThreadSignals, signum: u32) -> bool
where
    R: ProcessRegistry + ?Sized,
{
    registry
        .process(thread.pid())
        .map_or(false, |process| process.is_deliverable(thread, signum))
}

/// Drop every queued instance of `signum` on `pid`, process-wide and on
/// each of its threads. Returns the number of signal objects released.
pub fn clear_pending<R>(registry: &R, pid: ProcessId, signum: u32) -> usize
where
    R: ProcessRegistry + ?Sized,
{
    let Some(process) = registry.process(pid) else {
        return 0;
    };
    let threads = registry.threads(pid);
    process.clear_pending(threads.iter().map(Arc::as_ref), signum)
}

/// Reset the current process's disposition of `signum` to SIG_DFL
pub fn reset_disposition<R>(registry: &R, signum: u32)
where
    R: ProcessRegistry + ?Sized,
{
    if let Some(process) = registry.process(registry.current_pid()) {
        process.reset_action(signum);
    }
}

/// Deliver every deliverable pending signal of the running thread.
///
/// Called once at each safe re-entry point. Returns the number of signals
/// delivered. Never returns if a signal terminates the process.
pub fn deliver_all<H>(host: &H, env: &mut H::ExecEnv) -> usize
where
    H: ProcessRegistry + SignalArch,
{
    let pid = host.current_pid();
    let tid = host.current_tid();

    let Some(process) = host.process(pid) else {
        log::warn!("deliver_all: no signal descriptor for pid {}", pid.as_u64());
        return 0;
    };
    let Some(current) = host.thread(tid) else {
        log::warn!("deliver_all: no signal descriptor for tid {}", tid.as_u64());
        return 0;
    };

    process.flush_deferred();

    // SIGKILL bypasses masks and dispositions
    if process.is_pending(SIGKILL) || current.is_pending(SIGKILL) {
        if process.dequeue(None, SIGKILL).is_none() {
            let _ = process.dequeue(Some(current.as_ref()), SIGKILL);
        }
        log::info!("Process {} killed by SIGKILL (tid {})", pid.as_u64(), tid.as_u64());
        host.terminate(tid, SIGKILL);
    }

    // Job control requests are disposed of before they are queued
    for sig in [SIGSTOP, SIGCONT] {
        assert!(
            !process.is_pending(sig) && !current.is_pending(sig),
            "{} reached signal delivery",
            signal_name(sig)
        );
    }

    let mut delivered = deliver_process_signals(host, env, &process, &current);
    if host.thread_state(tid).accepts_signals() {
        delivered += deliver_thread_signals(host, env, &process, &current);
    }
    delivered
}

/// Deliver process-directed signals.
///
/// Each signal goes to the first other thread that does not mask it; all
/// queued instances are drained to that thread. The running thread is the
/// fallback. A signal every thread masks stays pending.
fn deliver_process_signals<H>(
    host: &H,
    env: &mut H::ExecEnv,
    process: &ProcessSignals,
    current: &Arc<ThreadSignals>,
) -> usize
where
    H: ProcessRegistry + SignalArch,
{
    let pending = process.pending();
    if pending.is_empty() {
        return 0;
    }

    let threads = host.threads(process.pid());
    let mut delivered = 0;

    for sig in pending.iter() {
        if process.ignores(sig) {
            continue;
        }

        let target = threads
            .iter()
            .find(|thread| thread.tid() != current.tid() && !thread.is_blocked(sig))
            .or_else(|| (!current.is_blocked(sig)).then_some(current));

        let Some(target) = target else {
            log::debug!(
                "Signal {} ({}) masked by every thread of pid {}, left pending",
                sig,
                signal_name(sig),
                process.pid().as_u64()
            );
            continue;
        };

        while let Some(signal) = process.dequeue(None, sig) {
            do_deliver(host, env, process, target, &signal);
            delivered += 1;
        }
    }

    delivered
}

/// Deliver the running thread's own signals in ascending signal order
fn deliver_thread_signals<H>(
    host: &H,
    env: &mut H::ExecEnv,
    process: &ProcessSignals,
    thread: &ThreadSignals,
) -> usize
where
    H: ProcessRegistry + SignalArch,
{
    let mut delivered = 0;
    for sig in 1..=NSIG {
        if !thread.is_pending(sig) || !process.is_deliverable(thread, sig) {
            continue;
        }
        while let Some(signal) = process.dequeue(Some(thread), sig) {
            do_deliver(host, env, process, thread, &signal);
            delivered += 1;
        }
    }
    delivered
}

/// Deliver one signal object on behalf of `thread`
fn do_deliver<H>(
    host: &H,
    env: &mut H::ExecEnv,
    process: &ProcessSignals,
    thread: &ThreadSignals,
    signal: &Signal,
) where
    H: ProcessRegistry + SignalArch,
{
    let sig = signal.signum();
    let action = process.action(sig);

    log::debug!(
        "Delivering signal {} ({}) to tid {}, handler={:#x}",
        sig,
        signal_name(sig),
        thread.tid().as_u64(),
        action.handler.as_raw()
    );

    // Disposition may have changed since the signal was picked
    if action.ignores(sig) {
        log::debug!(
            "Signal {} ({}) ignored by process {}",
            sig,
            signal_name(sig),
            process.pid().as_u64()
        );
        return;
    }

    let SigHandler::User(handler) = action.handler else {
        deliver_default_action(host, process, thread, sig);
        return;
    };

    let frame = process.begin_handler(thread, sig, &action);
    handle_self(host, env, thread, signal, handler, &action, frame.altstack);
    process.end_handler(thread, sig, frame);
}

/// Run a signal's default action on the delivering thread's own stack
fn deliver_default_action<H>(host: &H, process: &ProcessSignals, thread: &ThreadSignals, sig: u32)
where
    H: ProcessRegistry,
{
    let pid = process.pid().as_u64();
    if is_realtime(sig) {
        log::info!("Process {} terminated by signal {} (SIGRTMIN+{})", pid, sig, sig - SIGRTMIN);
        host.terminate(thread.tid(), sig);
    }

    match default_action(sig) {
        SignalDefaultAction::Terminate => {
            log::info!(
                "Process {} terminated by signal {} ({})",
                pid,
                sig,
                signal_name(sig)
            );
            host.terminate(thread.tid(), sig);
        }
        SignalDefaultAction::CoreDump => {
            log::warn!(
                "Process {} killed by signal {} ({}), core dump not supported",
                pid,
                sig,
                signal_name(sig)
            );
            host.terminate(thread.tid(), sig);
        }
        SignalDefaultAction::Stop => {
            log::warn!("{} not supported, ignored by process {}", signal_name(sig), pid);
        }
        SignalDefaultAction::Continue => {
            log::warn!("{} not supported, ignored by process {}", signal_name(sig), pid);
        }
        SignalDefaultAction::Ignore => {
            unreachable!("ignored signal {} ({}) reached delivery", sig, signal_name(sig));
        }
    }
}

/// Restores the auxiliary stack bookmark when the handler returns
struct AuxFrameGuard<'a, A: SignalArch> {
    arch: &'a A,
    saved: u64,
}

impl<'a, A: SignalArch> AuxFrameGuard<'a, A> {
    /// Start a fresh auxiliary frame below the current kernel stack pointer
    fn enter(arch: &'a A) -> Self {
        let saved = arch.aux_frame();
        arch.set_aux_frame(align_down(arch.kernel_stack_pointer(), AUXSP_ALIGN));
        AuxFrameGuard { arch, saved }
    }
}

impl<A: SignalArch> Drop for AuxFrameGuard<'_, A> {
    fn drop(&mut self) {
        self.arch.set_aux_frame(self.saved);
    }
}

/// Enter the user handler and come back
fn handle_self<H>(
    host: &H,
    env: &mut H::ExecEnv,
    thread: &ThreadSignals,
    signal: &Signal,
    handler: u64,
    action: &SignalAction,
    altstack: Option<(u64, usize)>,
) where
    H: SignalArch,
{
    let sig = signal.signum();

    let stack_pointer = match altstack {
        Some((base, size)) => {
            log::debug!("Using altstack {:#x} size {:#x} for signal {}", base, size, sig);
            stack_top(base, size)
        }
        None => align_down(host.user_stack_pointer(env), STACK_ALIGN),
    };

    {
        // Nested syscalls from inside the handler get their own aux frame
        let _aux = AuxFrameGuard::enter(host);

        if action.has_flag(SA_SIGINFO) {
            let mut ucontext = H::UContext::default();
            host.store_ucontext(env, &mut ucontext);
            host.jump_to_handler(
                env,
                HandlerCall {
                    target: thread.tid(),
                    signum: sig,
                    handler,
                    restorer: action.restorer,
                    stack_pointer,
                    on_altstack: altstack.is_some(),
                    siginfo: Some(signal.info()),
                    ucontext: Some(&mut ucontext),
                },
            );
            host.load_ucontext(&ucontext, env);
        } else {
            host.jump_to_handler(
                env,
                HandlerCall {
                    target: thread.tid(),
                    signum: sig,
                    handler,
                    restorer: action.restorer,
                    stack_pointer,
                    on_altstack: altstack.is_some(),
                    siginfo: None,
                    ucontext: None,
                },
            );
        }
    }

    log::debug!("Signal {} handler {:#x} returned (tid {})", sig, handler, thread.tid().as_u64());
}
