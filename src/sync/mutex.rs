//! Sleeping mutual exclusion.
//!
//! A contended `lock` puts the caller to sleep instead of spinning, so a
//! mutex may only be taken from thread context, never from an interrupt
//! handler. Waiters are queued FIFO on a list of records living on the
//! waiters' own stacks; a record exists exactly for the duration of the
//! wait, and is only ever touched with preemption disabled.
//!
//! There is no priority inheritance: a high-priority thread blocked on a
//! mutex held by a low-priority one waits for as long as middle-priority
//! threads keep the owner off the processor. Unbounded priority
//! inversion is an accepted property of this design.

use core::cell::{Cell, UnsafeCell};
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

use crate::errors::{Error, Result};
use crate::list::{Link, Linked, List};
use crate::thread::{self, ThreadRef};

/// Binds a waiting thread to the mutex for the duration of a contended
/// `lock`. Allocated on the waiter's stack.
struct Waiter {
    link: Link<Waiter>,
    thread: ThreadRef,
}

unsafe impl Linked for Waiter {
    fn link(&self) -> &Link<Self> {
        &self.link
    }
}

/// A sleeping mutex protecting a value of type `T`.
///
/// Not recursive: locking a mutex already owned by the caller is a
/// contract violation, as is dropping a guard on a thread other than the
/// one that acquired it.
pub struct Mutex<T> {
    locked: Cell<bool>,
    owner: Cell<Option<ThreadRef>>,
    waiters: List<Waiter>,
    data: UnsafeCell<T>,
}

// Lock and wait-list state is only touched with preemption disabled;
// the data is handed out exclusively through the guard.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            locked: Cell::new(false),
            owner: Cell::new(None),
            waiters: List::new(),
            data: UnsafeCell::new(data),
        }
    }

    fn set_owner(&self, thread: ThreadRef) {
        assert!(self.owner.get().is_none());
        assert!(!self.locked.get());

        self.owner.set(Some(thread));
        self.locked.set(true);
    }

    fn clear_owner(&self) {
        assert!(
            self.owner.get() == Some(thread::current()),
            "mutex: unlock by non-owner"
        );
        assert!(self.locked.get());

        self.owner.set(None);
        self.locked.set(false);
    }

    /// Acquire the mutex, sleeping while it is held by another thread.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let thread = thread::current();

        thread::preempt_disable();

        if self.locked.get() {
            let waiter = Waiter {
                link: Link::new(),
                thread,
            };

            unsafe { self.waiters.push_back(NonNull::from(&waiter)) };

            loop {
                thread::sleep();

                if !self.locked.get() {
                    break;
                }
            }

            unsafe { self.waiters.remove(NonNull::from(&waiter)) };
        }

        self.set_owner(thread);

        thread::preempt_enable();

        MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    /// Acquire the mutex only if it is free, reporting [`Error::Busy`]
    /// otherwise.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>> {
        thread::preempt_disable();

        let result = if self.locked.get() {
            Err(Error::Busy)
        } else {
            self.set_owner(thread::current());
            Ok(MutexGuard {
                mutex: self,
                _not_send: PhantomData,
            })
        };

        thread::preempt_enable();

        result
    }

    fn unlock(&self) {
        thread::preempt_disable();

        self.clear_owner();

        if let Some(waiter) = self.waiters.front() {
            thread::wakeup(unsafe { waiter.as_ref() }.thread);
        }

        thread::preempt_enable();
    }
}

/// Ownership of a locked [`Mutex`]; unlocks on drop, waking the first
/// waiter in FIFO order.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    /// Guards are tied to the acquiring thread.
    _not_send: PhantomData<*mut ()>,
}

impl<'a, T> MutexGuard<'a, T> {
    pub(crate) fn mutex(&self) -> &'a Mutex<T> {
        self.mutex
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
