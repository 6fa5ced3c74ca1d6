//! x86_64 architecture implementation.
//!
//! Only the stack geometry used while entering signal handlers lives here;
//! register save/restore and the jump itself belong to the host's
//! `SignalArch` implementation.

pub mod constants;

pub use constants::*;
