//! Signal error types
//!
//! Recoverable failures surfaced to the raiser or to syscall-level callers.
//! Precondition violations are assertions, and fatal delivery never returns.

use core::fmt;

use super::types::Signal;

/// Errors returned by signal operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalError {
    /// Process queue quota reached
    Again,
    /// Invalid signal number, flag or argument
    InvalidArgument,
    /// Target process or thread does not exist
    NoSuchProcess,
    /// Operation not permitted in the current state
    PermissionDenied,
    /// Supplied region is too small
    NoMemory,
}

impl SignalError {
    /// Negative errno value for the syscall return path
    pub fn errno(self) -> i64 {
        match self {
            SignalError::Again => -11,
            SignalError::InvalidArgument => -22,
            SignalError::NoSuchProcess => -3,
            SignalError::PermissionDenied => -1,
            SignalError::NoMemory => -12,
        }
    }
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalError::Again => write!(f, "signal queue full"),
            SignalError::InvalidArgument => write!(f, "invalid argument"),
            SignalError::NoSuchProcess => write!(f, "no such process"),
            SignalError::PermissionDenied => write!(f, "operation not permitted"),
            SignalError::NoMemory => write!(f, "not enough memory"),
        }
    }
}

/// Enqueue rejected because the process quota is exhausted
///
/// Carries the signal object back so the caller keeps ownership.
#[derive(Debug)]
pub struct QueueFull(pub Signal);

impl From<QueueFull> for SignalError {
    fn from(_: QueueFull) -> Self {
        SignalError::Again
    }
}
