//! POSIX signal core for a single-address-space kernel.
//!
//! The host kernel supplies process bookkeeping through
//! [`process::ProcessRegistry`] and register-level glue through
//! [`arch_impl::SignalArch`]; this crate owns queues, masks,
//! dispositions and the delivery protocol.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch_impl;
pub mod config;
pub mod logger;
pub mod process;
pub mod signal;
pub mod sync;

pub use config::SignalConfig;
pub use signal::SignalError;
