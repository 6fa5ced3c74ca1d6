//! ARM64 architecture constants.

/// SP must be 16-byte aligned whenever it is used to access memory.
pub const STACK_ALIGN: u64 = 16;

/// Alignment of auxiliary (syscall) stack frames.
pub const AUXSP_ALIGN: u64 = 16;
