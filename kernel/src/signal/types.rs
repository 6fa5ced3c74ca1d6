//! Signal-related data structures

use super::constants::*;

/// A set of signal numbers, one bit per signal (bit `sig - 1`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SigSet(u64);

impl SigSet {
    /// The empty set
    pub const fn empty() -> Self {
        SigSet(0)
    }

    /// Build a set from a raw bitmask
    pub const fn from_bits(bits: u64) -> Self {
        SigSet(bits)
    }

    /// Build a set holding a single signal
    pub const fn single(sig: u32) -> Self {
        SigSet(sig_mask(sig))
    }

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn contains(self, sig: u32) -> bool {
        (self.0 & sig_mask(sig)) != 0
    }

    #[inline]
    pub fn add(&mut self, sig: u32) {
        self.0 |= sig_mask(sig);
    }

    #[inline]
    pub fn remove(&mut self, sig: u32) {
        self.0 &= !sig_mask(sig);
    }

    #[inline]
    pub const fn union(self, other: SigSet) -> SigSet {
        SigSet(self.0 | other.0)
    }

    #[inline]
    pub const fn difference(self, other: SigSet) -> SigSet {
        SigSet(self.0 & !other.0)
    }

    /// Drop SIGKILL and SIGSTOP, which can never be blocked
    #[inline]
    pub const fn catchable(self) -> SigSet {
        SigSet(self.0 & !UNCATCHABLE_SIGNALS)
    }

    /// Lowest signal number in the set
    pub fn first(self) -> Option<u32> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() + 1)
        }
    }

    /// Iterate the member signal numbers in ascending order
    pub fn iter(self) -> impl Iterator<Item = u32> {
        (1..=NSIG).filter(move |&sig| self.contains(sig))
    }
}

impl core::ops::BitOr for SigSet {
    type Output = SigSet;

    fn bitor(self, rhs: SigSet) -> SigSet {
        self.union(rhs)
    }
}

impl core::ops::BitOrAssign for SigSet {
    fn bitor_assign(&mut self, rhs: SigSet) {
        self.0 |= rhs.0;
    }
}

/// Signal information passed to SA_SIGINFO handlers (subset of siginfo_t)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SigInfo {
    /// Signal number
    pub signo: u32,
    /// errno value associated with the signal
    pub errno: i32,
    /// Origin of the signal (SI_USER, SI_KERNEL, SI_QUEUE, ...)
    pub code: i32,
    /// Sending process
    pub pid: u64,
    /// Sending user
    pub uid: u32,
    /// Faulting address for trap-generated signals
    pub addr: u64,
    /// Value attached by sigqueue
    pub value: u64,
}

impl SigInfo {
    /// Plain siginfo for a signal sent with kill/raise
    pub fn new(signo: u32) -> Self {
        SigInfo {
            signo,
            code: SI_USER,
            ..Default::default()
        }
    }

    /// Siginfo for a synchronous fault at `addr`
    pub fn fault(signo: u32, code: i32, addr: u64) -> Self {
        SigInfo {
            signo,
            code,
            addr,
            ..Default::default()
        }
    }

    /// Siginfo for a sigqueue-style raise carrying a value
    pub fn queued(signo: u32, value: u64) -> Self {
        SigInfo {
            signo,
            code: SI_QUEUE,
            value,
            ..Default::default()
        }
    }
}

/// One raised instance of a signal
///
/// Owned by the queue holding it; dequeue hands ownership to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    signum: u32,
    info: SigInfo,
}

impl Signal {
    /// Create a signal object. The signal number in `info` is overwritten.
    pub fn new(signum: u32, mut info: SigInfo) -> Self {
        assert!(is_valid_signal(signum), "invalid signal number {}", signum);
        info.signo = signum;
        Signal { signum, info }
    }

    /// Shorthand for a kill-style signal with no extra payload
    pub fn user(signum: u32) -> Self {
        Self::new(signum, SigInfo::new(signum))
    }

    #[inline]
    pub fn signum(&self) -> u32 {
        self.signum
    }

    #[inline]
    pub fn info(&self) -> &SigInfo {
        &self.info
    }
}

/// Default action for a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDefaultAction {
    /// Terminate the process
    Terminate,
    /// Ignore the signal
    Ignore,
    /// Terminate with core dump
    CoreDump,
    /// Stop (pause) the process
    Stop,
    /// Continue a stopped process
    Continue,
}

/// Get the default action for a signal
pub fn default_action(sig: u32) -> SignalDefaultAction {
    match sig {
        // Terminate
        SIGHUP | SIGINT | SIGKILL | SIGPIPE | SIGALRM | SIGTERM | SIGUSR1 | SIGUSR2 | SIGIO
        | SIGPWR | SIGSTKFLT | SIGVTALRM | SIGPROF => SignalDefaultAction::Terminate,

        // Core dump
        SIGQUIT | SIGILL | SIGTRAP | SIGABRT | SIGBUS | SIGFPE | SIGSEGV | SIGXCPU | SIGXFSZ
        | SIGSYS => SignalDefaultAction::CoreDump,

        // Ignore
        SIGCHLD | SIGURG | SIGWINCH => SignalDefaultAction::Ignore,

        // Stop
        SIGSTOP | SIGTSTP | SIGTTIN | SIGTTOU => SignalDefaultAction::Stop,

        // Continue
        SIGCONT => SignalDefaultAction::Continue,

        // Realtime signals terminate by default
        _ => SignalDefaultAction::Terminate,
    }
}

/// Disposition of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigHandler {
    Default,
    Ignore,
    /// User handler entry point
    User(u64),
}

impl SigHandler {
    /// Decode a raw sa_handler value (SIG_DFL, SIG_IGN or an address)
    pub const fn from_raw(raw: u64) -> Self {
        match raw {
            SIG_DFL => SigHandler::Default,
            SIG_IGN => SigHandler::Ignore,
            addr => SigHandler::User(addr),
        }
    }

    pub const fn as_raw(self) -> u64 {
        match self {
            SigHandler::Default => SIG_DFL,
            SigHandler::Ignore => SIG_IGN,
            SigHandler::User(addr) => addr,
        }
    }
}

/// Signal disposition record (one per signal number, per process)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalAction {
    pub handler: SigHandler,
    /// Signals to block during handler execution
    pub mask: SigSet,
    /// Flags (SA_SIGINFO, SA_ONSTACK, SA_NODEFER, SA_RESETHAND, ...)
    pub flags: u64,
    /// Restorer function for sigreturn (provided by libc)
    pub restorer: u64,
}

impl Default for SignalAction {
    fn default() -> Self {
        SignalAction {
            handler: SigHandler::Default,
            mask: SigSet::empty(),
            flags: 0,
            restorer: 0,
        }
    }
}

impl SignalAction {
    /// Action that runs `handler` with the given flags
    pub fn handler(addr: u64, flags: u64) -> Self {
        SignalAction {
            handler: SigHandler::User(addr),
            flags,
            ..Default::default()
        }
    }

    /// Action that ignores the signal
    pub fn ignore() -> Self {
        SignalAction {
            handler: SigHandler::Ignore,
            ..Default::default()
        }
    }

    /// Check if handler is the default action
    #[inline]
    pub fn is_default(&self) -> bool {
        self.handler == SigHandler::Default
    }

    /// Check if handler ignores the signal
    #[inline]
    pub fn is_ignore(&self) -> bool {
        self.handler == SigHandler::Ignore
    }

    /// Check if handler is a user function
    #[inline]
    pub fn is_user_handler(&self) -> bool {
        matches!(self.handler, SigHandler::User(_))
    }

    #[inline]
    pub fn has_flag(&self, flag: u64) -> bool {
        (self.flags & flag) != 0
    }

    /// True if delivering `sig` under this action would do nothing,
    /// either through SIG_IGN or a default action of the ignore class.
    pub fn ignores(&self, sig: u32) -> bool {
        match self.handler {
            SigHandler::Ignore => true,
            SigHandler::Default => {
                !is_realtime(sig) && default_action(sig) == SignalDefaultAction::Ignore
            }
            SigHandler::User(_) => false,
        }
    }
}

/// Alternate signal stack configuration (matches Linux stack_t)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct StackT {
    /// Base address of the alternate stack
    pub ss_sp: u64,
    /// Flags (SS_ONSTACK, SS_DISABLE)
    pub ss_flags: i32,
    /// Padding for alignment
    pub _pad: i32,
    /// Size of the alternate stack in bytes
    pub ss_size: usize,
}

impl Default for StackT {
    fn default() -> Self {
        StackT {
            ss_sp: 0,
            ss_flags: SS_DISABLE as i32,
            _pad: 0,
            ss_size: 0,
        }
    }
}

/// Per-process alternate signal stack state
///
/// SS_ONSTACK and SS_DISABLE are never set together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AltStack {
    base: u64,
    size: usize,
    flags: u32,
}

impl Default for AltStack {
    fn default() -> Self {
        AltStack {
            base: 0,
            size: 0,
            flags: SS_DISABLE,
        }
    }
}

impl AltStack {
    /// An enabled alternate stack covering `[base, base + size)`
    pub fn new(base: u64, size: usize) -> Self {
        AltStack {
            base,
            size,
            flags: 0,
        }
    }

    #[inline]
    pub fn base(&self) -> u64 {
        self.base
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        (self.flags & SS_DISABLE) != 0
    }

    #[inline]
    pub fn is_on_stack(&self) -> bool {
        (self.flags & SS_ONSTACK) != 0
    }

    /// Mark the alternate stack as in use by a handler
    pub fn enter(&mut self) {
        assert!(!self.is_disabled(), "entering a disabled alternate stack");
        assert!(!self.is_on_stack(), "already executing on the alternate stack");
        assert!(self.base != 0, "alternate stack has no base address");
        self.flags |= SS_ONSTACK;
    }

    /// Leave the alternate stack after the handler returned
    pub fn leave(&mut self) {
        assert!(self.is_on_stack(), "leaving an alternate stack that is not in use");
        assert!(!self.is_disabled());
        self.flags &= !SS_ONSTACK;
    }

    /// User-visible view of the configuration
    pub fn to_stack_t(&self) -> StackT {
        StackT {
            ss_sp: self.base,
            ss_flags: self.flags as i32,
            _pad: 0,
            ss_size: self.size,
        }
    }
}
