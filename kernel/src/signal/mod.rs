//! POSIX signal core
//!
//! This module implements process- and thread-directed signals:
//! - Signal constants (SIGKILL, SIGTERM, realtime range, sigaction flags)
//! - Per-process and per-thread descriptors (queues, masks, dispositions)
//! - The enqueue/dequeue protocol with coalescing and a queue quota
//! - Delivery at safe re-entry points, including the alternate stack
//!
//! The host kernel calls `deliver_all` on every syscall and trap return.

pub mod constants;
pub mod delivery;
pub mod descriptor;
pub mod error;
pub mod lifecycle;
pub mod queue;
pub mod types;

pub use delivery::{clear_pending, deliver_all, is_deliverable, raise, reset_disposition};
pub use descriptor::{Enqueued, ProcessSignals, ThreadSignals};
pub use error::{QueueFull, SignalError};
pub use lifecycle::{process_desc_alloc, process_desc_free, thread_desc_alloc, thread_desc_free};
pub use types::*;
