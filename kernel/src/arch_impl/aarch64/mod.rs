//! ARM64 architecture implementation.
//!
//! Stack geometry for signal handler entry on AArch64.

pub mod constants;

pub use constants::*;
