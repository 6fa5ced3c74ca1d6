//! Signal numbers and constants following Linux x86_64 conventions

// Standard signals (1-31)
pub const SIGHUP: u32 = 1;
pub const SIGINT: u32 = 2;
pub const SIGQUIT: u32 = 3;
pub const SIGILL: u32 = 4;
pub const SIGTRAP: u32 = 5;
pub const SIGABRT: u32 = 6;
pub const SIGBUS: u32 = 7;
pub const SIGFPE: u32 = 8;
pub const SIGKILL: u32 = 9; // Cannot be caught or blocked
pub const SIGUSR1: u32 = 10;
pub const SIGSEGV: u32 = 11;
pub const SIGUSR2: u32 = 12;
pub const SIGPIPE: u32 = 13;
pub const SIGALRM: u32 = 14;
pub const SIGTERM: u32 = 15;
pub const SIGSTKFLT: u32 = 16;
pub const SIGCHLD: u32 = 17;
pub const SIGCONT: u32 = 18;
pub const SIGSTOP: u32 = 19; // Cannot be caught or blocked
pub const SIGTSTP: u32 = 20;
pub const SIGTTIN: u32 = 21;
pub const SIGTTOU: u32 = 22;
pub const SIGURG: u32 = 23;
pub const SIGXCPU: u32 = 24;
pub const SIGXFSZ: u32 = 25;
pub const SIGVTALRM: u32 = 26;
pub const SIGPROF: u32 = 27;
pub const SIGWINCH: u32 = 28;
pub const SIGIO: u32 = 29;
pub const SIGPWR: u32 = 30;
pub const SIGSYS: u32 = 31;

// Real-time signals (32-64), queued up to the process quota
pub const SIGRTMIN: u32 = 32;
pub const SIGRTMAX: u32 = 64;

/// Maximum signal number supported
pub const NSIG: u32 = 64;

/// Default per-process quota of queued signal objects (_POSIX_SIGQUEUE_MAX)
pub const SIGQUEUE_MAX: usize = 32;

// Signal handler special values
/// Default action for the signal
pub const SIG_DFL: u64 = 0;
/// Ignore the signal
pub const SIG_IGN: u64 = 1;

// sigprocmask "how" values
/// Block signals in set
pub const SIG_BLOCK: i32 = 0;
/// Unblock signals in set
pub const SIG_UNBLOCK: i32 = 1;
/// Set blocked signals to set
pub const SIG_SETMASK: i32 = 2;

// sigaction flags
/// Don't send SIGCHLD when children stop
pub const SA_NOCLDSTOP: u64 = 0x00000001;
/// Don't create zombies on child death
pub const SA_NOCLDWAIT: u64 = 0x00000002;
/// Provide siginfo_t and ucontext to handler
pub const SA_SIGINFO: u64 = 0x00000004;
/// Provide restorer function
pub const SA_RESTORER: u64 = 0x04000000;
/// Use alternate signal stack
pub const SA_ONSTACK: u64 = 0x08000000;
/// Restart interrupted syscalls
pub const SA_RESTART: u64 = 0x10000000;
/// Don't block signal during handler
pub const SA_NODEFER: u64 = 0x40000000;
/// Reset the disposition to SIG_DFL once the handler has run
pub const SA_RESETHAND: u64 = 0x80000000;

/// Every sigaction flag this layer understands
pub const SA_KNOWN_FLAGS: u64 = SA_NOCLDSTOP
    | SA_NOCLDWAIT
    | SA_SIGINFO
    | SA_RESTORER
    | SA_ONSTACK
    | SA_RESTART
    | SA_NODEFER
    | SA_RESETHAND;

// sigaltstack flags
/// Currently executing on the alternate stack
pub const SS_ONSTACK: u32 = 1;
/// Alternate stack is disabled
pub const SS_DISABLE: u32 = 2;
/// Disarm the alternate stack while a handler runs on it
pub const SS_AUTODISARM: u32 = 1 << 31;

/// Minimum size accepted for an alternate stack
pub const MINSIGSTKSZ: usize = 2048;

// siginfo si_code values
/// Sent by kill/raise from user space
pub const SI_USER: i32 = 0;
/// Sent by the kernel
pub const SI_KERNEL: i32 = 0x80;
/// Sent by sigqueue
pub const SI_QUEUE: i32 = -1;
/// Sent by tkill/tgkill
pub const SI_TKILL: i32 = -6;

/// Convert signal number to bit mask
///
/// Returns 0 for invalid signal numbers (0 or > NSIG)
#[inline]
pub const fn sig_mask(sig: u32) -> u64 {
    if sig == 0 || sig > NSIG {
        0
    } else {
        1u64 << (sig - 1)
    }
}

/// Signals that cannot be caught, blocked, or ignored
pub const UNCATCHABLE_SIGNALS: u64 = sig_mask(SIGKILL) | sig_mask(SIGSTOP);

/// Check if a signal number is valid
#[inline]
pub const fn is_valid_signal(sig: u32) -> bool {
    sig > 0 && sig <= NSIG
}

/// Check if a signal can be caught/blocked
#[inline]
pub const fn is_catchable(sig: u32) -> bool {
    sig != SIGKILL && sig != SIGSTOP
}

/// Real-time signals may be queued more than once
#[inline]
pub const fn is_realtime(sig: u32) -> bool {
    sig >= SIGRTMIN && sig <= SIGRTMAX
}

/// Get signal name for debugging
pub fn signal_name(sig: u32) -> &'static str {
    match sig {
        SIGHUP => "SIGHUP",
        SIGINT => "SIGINT",
        SIGQUIT => "SIGQUIT",
        SIGILL => "SIGILL",
        SIGTRAP => "SIGTRAP",
        SIGABRT => "SIGABRT",
        SIGBUS => "SIGBUS",
        SIGFPE => "SIGFPE",
        SIGKILL => "SIGKILL",
        SIGUSR1 => "SIGUSR1",
        SIGSEGV => "SIGSEGV",
        SIGUSR2 => "SIGUSR2",
        SIGPIPE => "SIGPIPE",
        SIGALRM => "SIGALRM",
        SIGTERM => "SIGTERM",
        SIGSTKFLT => "SIGSTKFLT",
        SIGCHLD => "SIGCHLD",
        SIGCONT => "SIGCONT",
        SIGSTOP => "SIGSTOP",
        SIGTSTP => "SIGTSTP",
        SIGTTIN => "SIGTTIN",
        SIGTTOU => "SIGTTOU",
        SIGURG => "SIGURG",
        SIGXCPU => "SIGXCPU",
        SIGXFSZ => "SIGXFSZ",
        SIGVTALRM => "SIGVTALRM",
        SIGPROF => "SIGPROF",
        SIGWINCH => "SIGWINCH",
        SIGIO => "SIGIO",
        SIGPWR => "SIGPWR",
        SIGSYS => "SIGSYS",
        _ if is_realtime(sig) => "SIGRT",
        _ => "UNKNOWN",
    }
}
