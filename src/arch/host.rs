//! Host architecture shim.
//!
//! Lets the crate build and its state machines run on a hosted toolchain.
//! The interrupt mask is a tracked flag so the core's critical-section
//! assertions hold, but there is no way to transfer control between
//! thread stacks on a host: `context_switch` only performs the run-queue
//! bookkeeping side effects of its caller, and `context_load` is
//! unreachable. Code exercised on the host must therefore stay on
//! non-blocking paths.

use portable_atomic::{AtomicBool, Ordering};

use super::Arch;

static INTR_ENABLED: AtomicBool = AtomicBool::new(true);

pub struct HostArch;

impl Arch for HostArch {
    fn intr_enable() {
        INTR_ENABLED.store(true, Ordering::SeqCst);
    }

    fn intr_disable() {
        INTR_ENABLED.store(false, Ordering::SeqCst);
    }

    fn intr_enabled() -> bool {
        INTR_ENABLED.load(Ordering::SeqCst)
    }

    fn intr_save() -> u32 {
        INTR_ENABLED.swap(false, Ordering::SeqCst) as u32
    }

    fn intr_restore(primask: u32) {
        INTR_ENABLED.store(primask != 0, Ordering::SeqCst);
    }

    fn idle() {
        core::hint::spin_loop();
    }

    fn halt() -> ! {
        Self::intr_disable();

        loop {
            core::hint::spin_loop();
        }
    }

    unsafe fn stack_forge(stack: *mut u8, size: usize, _entry: usize, _arg: usize) -> *mut u8 {
        ((stack as usize + size) & !0xf) as *mut u8
    }

    unsafe fn context_switch(_prev_sp: *mut *mut u8, _next_sp: *mut u8) {
        // Control stays with the caller.
    }

    unsafe fn context_load(_sp: *mut u8) -> ! {
        panic!("host: cannot load a thread context");
    }
}
