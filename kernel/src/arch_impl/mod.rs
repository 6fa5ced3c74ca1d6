//! Architecture abstraction layer for signal delivery.
//!
//! This module provides the architecture-agnostic `SignalArch` trait and
//! re-exports the current architecture's stack constants. Code outside this
//! module should use the trait rather than register layouts directly.
//!
//! # Supported Architectures
//!
//! - `x86_64`: primary target
//! - `aarch64`: stack alignment only; the handler jump is the host's job

#[cfg(not(target_arch = "aarch64"))]
pub mod x86_64;
#[cfg(not(target_arch = "aarch64"))]
pub use x86_64 as current;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use aarch64 as current;

pub mod traits;
pub use traits::*;

pub use current::{AUXSP_ALIGN, STACK_ALIGN};

/// Round `value` down to a power-of-two `align`
#[inline]
pub const fn align_down(value: u64, align: u64) -> u64 {
    value & !(align - 1)
}

/// Initial stack pointer for a handler running on `[base, base + size)`
#[inline]
pub const fn stack_top(base: u64, size: usize) -> u64 {
    align_down(base + size as u64, STACK_ALIGN)
}
