#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![forbid(unreachable_pub)]

//! Preemptive multitasking kernel core for single-processor embedded
//! targets.
//!
//! The crate provides the scheduling, concurrency, time and memory core
//! of a small kernel:
//!
//! - a fixed-priority preemptive scheduler with sleep/wakeup
//!   ([`thread`]),
//! - a sleeping mutex and condition variables built on it ([`sync`]),
//! - software timers dispatched from a worker thread ([`timer`]),
//! - a first-fit heap allocator with boundary-tag coalescing ([`mem`]),
//! - the small structures everything shares ([`list`], [`cbuf`]),
//! - and the glue toward the platform: IRQ registration ([`irq`]),
//!   console plumbing ([`console`]), and the processor contract
//!   ([`arch`]).
//!
//! Chip bring-up stays with the platform: it provides an interrupt
//! controller, a periodic tick that calls [`thread::report_tick`], a
//! heap region, and optionally a console sink for diagnostics.
//!
//! # Bring-up order
//!
//! ```ignore
//! use picokern::{config, irq, mem, thread, timer};
//!
//! fn main() -> ! {
//!     thread::bootstrap();                 // current-thread context
//!     irq::set_controller(&CONTROLLER);    // platform collaborators
//!     picokern::console::set_sink(&UART);
//!     mem::setup(heap_region()).unwrap();  // heap
//!     thread::setup();                     // idle thread
//!     timer::setup();                      // timer worker
//!
//!     thread::create(app_main, "main", 4096, 10).unwrap();
//!
//!     thread::enable_scheduler()           // does not return
//! }
//! ```
//!
//! The tick source then drives scheduling by having its interrupt
//! handler call [`thread::report_tick`].

pub mod arch;
pub mod cbuf;
pub mod config;
pub mod console;
pub mod errors;
pub mod irq;
pub mod list;
pub mod mem;
pub mod sync;
pub mod thread;
pub mod timer;

#[cfg(test)]
mod tests;

#[cfg(test)]
extern crate std;

// ============================================================================
// Public API
// ============================================================================

pub use arch::{Arch, DefaultArch};
pub use cbuf::CBuf;
pub use console::ConsoleSink;
pub use errors::{Error, Result};
pub use irq::IrqController;
pub use sync::{Condvar, Mutex, MutexGuard};
pub use thread::{JoinHandle, ThreadRef};
pub use timer::{Ticks, Timer};

/// Yield the current thread's time slice to the scheduler.
///
/// The thread remains runnable and is redispatched when the scheduler
/// next selects it.
#[inline]
pub fn yield_now() {
    thread::yield_now();
}

// Panic handler for bare-metal builds: report through the console sink,
// then halt the processor.
#[cfg(all(not(test), not(feature = "std-shim")))]
mod panic_handler {
    use core::fmt::Write;
    use core::panic::PanicInfo;

    use crate::arch::{Arch, DefaultArch};
    use crate::console;

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        DefaultArch::intr_disable();

        let mut writer = console::Writer;
        let _ = writeln!(writer, "panic: {}", info);

        DefaultArch::halt()
    }
}
