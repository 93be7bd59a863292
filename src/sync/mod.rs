//! Synchronization primitives built on the scheduler's sleep/wakeup.
//!
//! Unlike preemption-based critical sections, these keep preemption
//! enabled while the protected work runs, which makes them the right
//! tool for critical sections that are long or that may block.

pub mod condvar;
pub mod mutex;

pub use condvar::Condvar;
pub use mutex::{Mutex, MutexGuard};
