//! Architecture-agnostic traits for signal handler entry.
//!
//! The delivery engine never touches registers. Everything that depends on
//! the register file or on the stack switch is reached through `SignalArch`.

use crate::process::ThreadId;
use crate::signal::types::SigInfo;

/// Arguments for one jump into a user signal handler.
pub struct HandlerCall<'a, U> {
    /// Thread the signal is delivered to
    pub target: ThreadId,
    /// Signal number (first handler argument)
    pub signum: u32,
    /// Handler entry point
    pub handler: u64,
    /// sa_restorer, 0 when not supplied
    pub restorer: u64,
    /// Stack pointer the handler starts with
    pub stack_pointer: u64,
    /// True if `stack_pointer` lies on the alternate signal stack
    pub on_altstack: bool,
    /// siginfo argument, only for SA_SIGINFO handlers
    pub siginfo: Option<&'a SigInfo>,
    /// ucontext argument, only for SA_SIGINFO handlers
    pub ucontext: Option<&'a mut U>,
}

/// Execution-environment operations needed to run user signal handlers.
///
/// Implemented by the architecture glue of the host kernel.
pub trait SignalArch {
    /// Saved register state of a thread at a trap or syscall boundary.
    type ExecEnv;

    /// ucontext-equivalent handed to SA_SIGINFO handlers.
    type UContext: Default;

    /// User stack pointer recorded in the execution environment.
    fn user_stack_pointer(&self, env: &Self::ExecEnv) -> u64;

    /// Fill `uc` from the execution environment.
    fn store_ucontext(&self, env: &Self::ExecEnv, uc: &mut Self::UContext);

    /// Write `uc` back into the execution environment after the handler.
    fn load_ucontext(&self, uc: &Self::UContext, env: &mut Self::ExecEnv);

    /// Run the handler on `call.stack_pointer` and return once it returns.
    ///
    /// The implementation saves and restores the full extended register
    /// state (FPU/vector) around user code.
    fn jump_to_handler(&self, env: &mut Self::ExecEnv, call: HandlerCall<'_, Self::UContext>);

    /// Current kernel stack pointer of the delivering thread.
    fn kernel_stack_pointer(&self) -> u64;

    /// Base frame nested syscalls start from on the auxiliary stack.
    fn aux_frame(&self) -> u64;

    /// Move the auxiliary stack base frame.
    fn set_aux_frame(&self, fp: u64);
}
