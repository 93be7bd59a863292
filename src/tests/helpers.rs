//! Test scaffolding shared by the cross-module tests.

use spin::{Mutex, Once};

use crate::{mem, thread, timer};

const TEST_HEAP_SIZE: usize = 256 * 1024;

#[repr(align(16))]
struct AlignedHeap([u8; TEST_HEAP_SIZE]);

static TEST_LOCK: Mutex<()> = Mutex::new(());
static INIT: Once<()> = Once::new();

/// Run `f` against the initialized kernel singletons.
///
/// The kernel state is process-wide and the test runner is
/// multi-threaded, so this serializes the callers, performs one-time
/// bring-up, and holds one preemption level across the body. The extra
/// level keeps yield requests latent (the host shim could not honor a
/// context switch anyway); the body must stay on non-blocking paths.
pub(crate) fn with_kernel<R>(f: impl FnOnce() -> R) -> R {
    let _guard = TEST_LOCK.lock();

    INIT.call_once(|| {
        let heap = std::boxed::Box::leak(std::boxed::Box::new(AlignedHeap([0; TEST_HEAP_SIZE])));

        thread::bootstrap();
        thread::preempt_disable();

        mem::setup(&mut heap.0).unwrap();
        thread::setup();
        timer::setup();

        thread::testing::clear_yield();
        thread::preempt_enable();
    });

    thread::preempt_disable();
    let result = f();
    thread::testing::clear_yield();
    thread::preempt_enable();

    result
}

/// Run `f` with the scheduler critical section held (preemption and
/// interrupts disabled), the way interrupt-context code runs.
pub(crate) fn with_scheduler_locked<R>(f: impl FnOnce() -> R) -> R {
    let primask = thread::preempt_disable_intr_save();
    let result = f();
    thread::preempt_enable_intr_restore(primask);
    result
}

/// Small deterministic generator for randomized sequences.
pub(crate) struct XorShift64(u64);

impl XorShift64 {
    pub(crate) fn new(seed: u64) -> Self {
        Self(if seed == 0 { 0x9e37_79b9_7f4a_7c15 } else { seed })
    }

    pub(crate) fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub(crate) fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound
    }
}
