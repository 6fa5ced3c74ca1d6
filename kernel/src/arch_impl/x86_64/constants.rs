//! x86_64 architecture constants.

/// User stack alignment required by the SysV ABI at a call boundary.
pub const STACK_ALIGN: u64 = 16;

/// Alignment of auxiliary (syscall) stack frames.
/// Matches the extended register context alignment used by XSAVE.
pub const AUXSP_ALIGN: u64 = 64;
