//! Software timers.
//!
//! Time is counted in ticks of the scheduling clock. The counter is a
//! finite unsigned integer and wraps, so "before" and "after" cannot be
//! ordinary comparisons: the implementation partitions the value range
//! instead, treating everything from a reference up to half the range as
//! the future and the rest as the past. At 100 Hz a 32-bit counter wraps
//! roughly every 497 days.
//!
//! Scheduled timers sit on a single list sorted by deadline, protected
//! by a mutex so that scheduling a timer keeps preemption enabled. The
//! tick interrupt cannot take that mutex, so it works from two summary
//! variables refreshed under the mutex with interrupts disabled: whether
//! the list is empty, and the deadline of its head. When the head
//! deadline occurs, the interrupt wakes a dedicated worker thread, which
//! dequeues every expired timer and runs its callback. Callbacks
//! therefore execute in thread context, with preemption and interrupts
//! enabled and the timer list unlocked: they may take mutexes, allocate,
//! and reschedule their own timer, which is how periodic timers are
//! built.
//!
//! There is no cancellation: once scheduled, a timer fires.

use core::cell::Cell;
use core::ptr::NonNull;

use portable_atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};

use crate::arch::{Arch, DefaultArch as A};
use crate::config::{MIN_PRIORITY, TIMER_STACK_SIZE};
use crate::list::{Link, Linked, List};
use crate::sync::Mutex;
use crate::thread::{self, Thread, ThreadRef};

/// Tick values. Wraps; compare only through [`ticks_expired`] and
/// [`ticks_occurred`].
pub type Ticks = u32;

/// Boundary between future and past, relative to a reference: half the
/// value range.
const THRESHOLD: Ticks = Ticks::MAX / 2;

/// The current time, in ticks. Written by the tick interrupt; read with
/// interrupts disabled.
static TICKS: AtomicU32 = AtomicU32::new(0);

/// Scheduled timers, sorted by ascending deadline.
static TIMERS: Mutex<List<Timer>> = Mutex::new(List::new());

/// Copy of `TIMERS.is_empty()` readable from interrupt context, where
/// taking the mutex is impossible. Accessed with interrupts disabled.
static LIST_EMPTY: AtomicBool = AtomicBool::new(true);

/// Deadline of the first timer on the list. Only meaningful while the
/// list is non-empty. Accessed with interrupts disabled.
static WAKEUP_TICKS: AtomicU32 = AtomicU32::new(0);

/// The worker thread providing context for all callbacks.
static WORKER: AtomicPtr<Thread> = AtomicPtr::new(core::ptr::null_mut());

/// True if `ticks` is strictly in the past relative to `reference`.
pub fn ticks_expired(ticks: Ticks, reference: Ticks) -> bool {
    ticks.wrapping_sub(reference) > THRESHOLD
}

/// True if `ticks` is the present or the past relative to `reference`.
pub fn ticks_occurred(ticks: Ticks, reference: Ticks) -> bool {
    ticks == reference || ticks_expired(ticks, reference)
}

/// A software timer: a deadline bound to a callback.
///
/// The callback runs in the worker thread with the given argument. A
/// timer must stay valid while scheduled, hence the `'static` receiver
/// on [`Timer::schedule`].
pub struct Timer {
    link: Link<Timer>,
    ticks: Cell<Ticks>,
    callback: fn(*mut ()),
    arg: *mut (),
}

// Deadline and links are only touched under the timer mutex; the
// callback and argument are immutable after construction.
unsafe impl Send for Timer {}
unsafe impl Sync for Timer {}

unsafe impl Linked for Timer {
    fn link(&self) -> &Link<Self> {
        &self.link
    }
}

impl Timer {
    pub const fn new(callback: fn(*mut ()), arg: *mut ()) -> Self {
        Self {
            link: Link::new(),
            ticks: Cell::new(0),
            callback,
            arg,
        }
    }

    /// Schedule the timer for an absolute deadline in ticks.
    ///
    /// The timer must not already be scheduled. The deadline may be in
    /// the past (by the wrap-safe order), in which case the callback
    /// runs at the next tick.
    pub fn schedule(&'static self, ticks: Ticks) {
        let guard = TIMERS.lock();

        assert!(!self.link.is_linked(), "timer: already scheduled");
        self.ticks.set(ticks);

        // Sorted insertion keeps dispatch O(1); scheduling is O(n) and
        // assumes few timers. Using a mutex rather than disabling
        // preemption here keeps higher priority threads runnable across
        // the scan.
        let mut at = None;

        for node in unsafe { guard.iter() } {
            if !ticks_expired(unsafe { node.as_ref() }.ticks.get(), ticks) {
                at = Some(node);
                break;
            }
        }

        unsafe { guard.insert_before(at, NonNull::from(self)) };

        // Refresh the interrupt-visible summaries while still holding
        // the mutex: doing it after unlocking would let a tick sneak in
        // and wake the worker for a list another thread already drained.
        if let Some(first) = guard.front() {
            let head_ticks = unsafe { first.as_ref() }.ticks.get();

            let primask = A::intr_save();
            LIST_EMPTY.store(false, Ordering::Relaxed);
            WAKEUP_TICKS.store(head_ticks, Ordering::Relaxed);
            A::intr_restore(primask);
        }
    }

    /// Deadline of the timer, as observed under the timer mutex.
    ///
    /// While the timer is being dispatched (dequeued but its callback
    /// not yet finished), the value is the last scheduled deadline; no
    /// agreement between "scheduled" and "deadline" is guaranteed across
    /// a concurrent dispatch.
    pub fn time(&self) -> Ticks {
        let _guard = TIMERS.lock();
        self.ticks.get()
    }
}

/// Current time in ticks.
pub fn now() -> Ticks {
    let primask = A::intr_save();
    let ticks = TICKS.load(Ordering::Relaxed);
    A::intr_restore(primask);
    ticks
}

fn work_pending() -> bool {
    assert!(!A::intr_enabled());

    !LIST_EMPTY.load(Ordering::Relaxed)
        && ticks_occurred(WAKEUP_TICKS.load(Ordering::Relaxed), TICKS.load(Ordering::Relaxed))
}

/// Dequeue and run every timer whose deadline has occurred at `now`,
/// then refresh the interrupt-visible summaries.
pub(crate) fn process_list(now: Ticks) {
    let mut guard = TIMERS.lock();

    loop {
        let Some(first) = guard.front() else {
            break;
        };

        let timer = unsafe { first.as_ref() };

        if !ticks_occurred(timer.ticks.get(), now) {
            break;
        }

        unsafe { guard.remove(first) };

        // The callback runs without the list mutex so that it may
        // reschedule this or any other timer.
        drop(guard);
        (timer.callback)(timer.arg);
        guard = TIMERS.lock();
    }

    let primask = A::intr_save();

    let empty = guard.is_empty();
    LIST_EMPTY.store(empty, Ordering::Relaxed);

    if let Some(first) = guard.front() {
        WAKEUP_TICKS.store(unsafe { first.as_ref() }.ticks.get(), Ordering::Relaxed);
    }

    A::intr_restore(primask);
}

fn run() {
    loop {
        let primask = thread::preempt_disable_intr_save();

        let now = loop {
            let now = TICKS.load(Ordering::Relaxed);

            if work_pending() {
                break now;
            }

            thread::sleep();
        };

        thread::preempt_enable_intr_restore(primask);

        process_list(now);
    }
}

/// Initialize the timer service: reset the clock and create the worker
/// thread. The scheduler and the heap must be up.
pub fn setup() {
    TICKS.store(0, Ordering::Relaxed);
    LIST_EMPTY.store(true, Ordering::Relaxed);

    match thread::create(run, "timer", TIMER_STACK_SIZE, MIN_PRIORITY) {
        Ok(handle) => {
            WORKER.store(handle.thread().0.as_ptr(), Ordering::Relaxed);
            // The worker never exits; the handle is intentionally not
            // kept for joining.
            core::mem::forget(handle);
        }
        Err(_) => panic!("timer: unable to create thread"),
    }
}

/// Report a tick. Must be called from the tick interrupt.
///
/// Advances the clock and wakes the worker thread when the head of the
/// timer list has come due.
pub fn report_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);

    if work_pending() {
        if let Some(worker) = NonNull::new(WORKER.load(Ordering::Relaxed)) {
            thread::wakeup(ThreadRef(worker));
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_expired() {
        assert!(!ticks_expired(10, 10));
        assert!(!ticks_expired(11, 10));
        assert!(ticks_expired(9, 10));

        // The future extends half the range past the reference.
        assert!(!ticks_expired(10 + THRESHOLD, 10));
        assert!(ticks_expired(10u32.wrapping_add(THRESHOLD).wrapping_add(1), 10));

        // Wrap-around: a deadline past zero is still in the future.
        assert!(!ticks_expired(5, Ticks::MAX - 5));
        assert!(ticks_expired(Ticks::MAX - 5, 5));
    }

    #[test]
    fn test_ticks_occurred() {
        assert!(ticks_occurred(10, 10));
        assert!(ticks_occurred(9, 10));
        assert!(!ticks_occurred(11, 10));
        assert!(ticks_occurred(Ticks::MAX, 0));
    }
}
