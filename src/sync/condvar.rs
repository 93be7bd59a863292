//! Condition variables.
//!
//! A condition variable lets threads wait for a predicate over state
//! protected by a mutex. Waiting atomically releases the mutex and
//! blocks; the atomicity is with respect to concurrent signals, and is
//! obtained by disabling preemption across the unlock and the enqueue,
//! since signalling also runs with preemption disabled. Signals sent
//! while the associated mutex is not held can be missed; that is the
//! caller's race, not the kernel's.
//!
//! Wake-ups may be spurious, so the predicate is always re-tested in a
//! loop:
//!
//! ```ignore
//! let mut guard = mutex.lock();
//! while !guard.ready {
//!     guard = condvar.wait(guard);
//! }
//! ```

use core::cell::Cell;
use core::ptr::NonNull;

use crate::list::{Link, Linked, List};
use crate::sync::mutex::MutexGuard;
use crate::thread::{self, ThreadRef};

/// Binds a waiting thread to the condition variable for the duration of
/// a `wait`. Allocated on the waiter's stack; the `awaken` flag filters
/// spurious wake-ups and makes signal/broadcast idempotent per waiter.
struct Waiter {
    link: Link<Waiter>,
    thread: ThreadRef,
    awaken: Cell<bool>,
}

unsafe impl Linked for Waiter {
    fn link(&self) -> &Link<Self> {
        &self.link
    }
}

impl Waiter {
    /// Wake the waiter unless it was already woken; returns whether a
    /// wake-up was issued.
    fn wakeup(&self) -> bool {
        if self.awaken.get() {
            return false;
        }

        thread::wakeup(self.thread);
        self.awaken.set(true);
        true
    }
}

/// A condition variable.
pub struct Condvar {
    waiters: List<Waiter>,
}

// The wait list is only touched with preemption disabled.
unsafe impl Send for Condvar {}
unsafe impl Sync for Condvar {}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            waiters: List::new(),
        }
    }

    /// Atomically release the mutex and wait for a signal, then
    /// reacquire the mutex.
    ///
    /// The guard must belong to the mutex associated with this condition
    /// variable by convention; all waiters of one condition variable
    /// must use the same mutex.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mutex = guard.mutex();

        let waiter = Waiter {
            link: Link::new(),
            thread: thread::current(),
            awaken: Cell::new(false),
        };

        thread::preempt_disable();

        // Releasing the mutex after taking the condition variable (done
        // here by disabling preemption) is what makes the wait atomic
        // with respect to concurrent signals.
        drop(guard);

        unsafe { self.waiters.push_back(NonNull::from(&waiter)) };

        loop {
            thread::sleep();

            if waiter.awaken.get() {
                break;
            }
        }

        unsafe { self.waiters.remove(NonNull::from(&waiter)) };

        thread::preempt_enable();

        // Relocking may not happen inside the critical section above:
        // taking a mutex can sleep, which preemption-disabled code must
        // not do. Relocking outside also keeps the section shorter.
        mutex.lock()
    }

    /// Wake one thread currently waiting, if any.
    pub fn signal(&self) {
        thread::preempt_disable();

        for waiter in unsafe { self.waiters.iter() } {
            if unsafe { waiter.as_ref() }.wakeup() {
                break;
            }
        }

        thread::preempt_enable();
    }

    /// Wake every thread currently waiting.
    ///
    /// All waiters are made runnable even though at most one of them can
    /// reacquire the mutex at a time; the rest go back to sleep inside
    /// `lock`. The thundering herd is accepted for simplicity.
    pub fn broadcast(&self) {
        thread::preempt_disable();

        for waiter in unsafe { self.waiters.iter() } {
            unsafe { waiter.as_ref() }.wakeup();
        }

        thread::preempt_enable();
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}
