//! Compile-time configuration.
//!
//! Constants governing the scheduler, the heap and the interrupt layer.
//! All limits are fixed at build time; the heap region itself is provided
//! at runtime by the platform (see `mem::setup`).

/// Scheduling clock frequency in Hz.
///
/// The tick source must call `thread::report_tick` exactly once per period.
/// On each tick the scheduler may mark the currently running thread to
/// yield, so this is also the round-robin granularity within a priority.
pub const TICK_HZ: u32 = 100;

/// Total number of thread priorities.
pub const NR_PRIORITIES: usize = 20;

/// The lowest priority, used by the idle thread. Regular threads may also
/// use it for very low priority background work.
pub const IDLE_PRIORITY: u8 = 0;

/// Lowest regular priority.
pub const MIN_PRIORITY: u8 = 1;

/// Highest regular priority.
pub const MAX_PRIORITY: u8 = (NR_PRIORITIES - 1) as u8;

/// Minimum size of a thread stack in bytes. Creation requests below this
/// are rounded up.
pub const MIN_STACK_SIZE: usize = 512;

/// Capacity of a thread name, in bytes.
pub const THREAD_NAME_MAX: usize = 16;

/// Alignment of addresses returned by `mem::alloc`, and the alignment the
/// heap region itself must satisfy. Must be a power of two, at least the
/// machine word size.
pub const HEAP_ALIGN: usize = 8;

/// Number of IRQ lines the handler table can register.
pub const NR_IRQS: usize = 32;

/// Stack size of the timer worker thread.
pub const TIMER_STACK_SIZE: usize = 4096;

const _: () = assert!(HEAP_ALIGN.is_power_of_two());
const _: () = assert!(HEAP_ALIGN >= core::mem::size_of::<usize>());
const _: () = assert!(NR_PRIORITIES >= 8 && NR_PRIORITIES <= 256);
const _: () = assert!(THREAD_NAME_MAX > 0);
