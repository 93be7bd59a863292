//! Error handling for the kernel core.
//!
//! Only recoverable conditions are expressed as values. Contract
//! violations (unlocking a mutex that isn't owned, waking a dead thread,
//! unbalancing the preemption level, corrupting a heap boundary tag) are
//! programming errors and abort through an assertion instead of being
//! reported to the caller.

use core::fmt;

/// Result type for fallible kernel operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Recoverable error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A required allocation could not be satisfied.
    OutOfMemory,
    /// The resource is held by someone else; the non-blocking caller may
    /// retry later.
    Busy,
    /// An argument was out of range or otherwise unusable.
    InvalidArgument,
}

impl Error {
    /// Short description, usable from contexts where formatting is
    /// undesirable (e.g. interrupt-driven diagnostics).
    pub fn as_str(self) -> &'static str {
        match self {
            Error::OutOfMemory => "out of memory",
            Error::Busy => "resource busy",
            Error::InvalidArgument => "invalid argument",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
