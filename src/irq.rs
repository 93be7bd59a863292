//! IRQ handler registration and dispatch.
//!
//! The platform owns the interrupt controller hardware and exposes it
//! through the [`IrqController`] trait; the kernel owns the mapping from
//! IRQ numbers to handlers. The platform's vector code funnels every
//! interrupt into [`dispatch`].
//!
//! Handler slots are shared with interrupt context, so they are only
//! mutated with both interrupts and preemption disabled.

use core::cell::Cell;

use spin::Once;

use crate::arch::{Arch, DefaultArch as A};
use crate::config::NR_IRQS;
use crate::errors::{Error, Result};
use crate::thread;

/// An interrupt handler and its argument.
pub type IrqHandlerFn = fn(*mut ());

struct Slot {
    handler: Cell<Option<IrqHandlerFn>>,
    arg: Cell<*mut ()>,
}

impl Slot {
    const fn new() -> Self {
        Self {
            handler: Cell::new(None),
            arg: Cell::new(core::ptr::null_mut()),
        }
    }
}

struct Table([Slot; NR_IRQS]);

// Slots are only mutated with interrupts and preemption disabled.
unsafe impl Sync for Table {}

static TABLE: Table = Table([const { Slot::new() }; NR_IRQS]);

/// Mask and unmask operations of the platform interrupt controller.
pub trait IrqController: Sync {
    fn enable(&self, irq: u32);
    fn disable(&self, irq: u32);
}

static CONTROLLER: Once<&'static dyn IrqController> = Once::new();

/// Install the platform interrupt controller. One-shot; later calls are
/// ignored.
pub fn set_controller(controller: &'static dyn IrqController) {
    CONTROLLER.call_once(|| controller);
}

/// Register a handler for an IRQ line and enable the line.
///
/// Out-of-range lines are [`Error::InvalidArgument`]; registering a line
/// twice is a contract violation. The interrupt controller must have
/// been installed.
pub fn register(irq: u32, handler: IrqHandlerFn, arg: *mut ()) -> Result<()> {
    let Some(slot) = TABLE.0.get(irq as usize) else {
        return Err(Error::InvalidArgument);
    };

    thread::preempt_disable();
    let primask = A::intr_save();

    assert!(slot.handler.get().is_none(), "irq: line already registered");
    slot.arg.set(arg);
    slot.handler.set(Some(handler));

    match CONTROLLER.get() {
        Some(controller) => controller.enable(irq),
        None => panic!("irq: no controller installed"),
    }

    A::intr_restore(primask);
    thread::preempt_enable();

    Ok(())
}

/// Dispatch an interrupt to its registered handler.
///
/// Called by the platform vector code, in interrupt context with
/// interrupts masked. An interrupt without a handler is fatal.
///
/// Handlers may wake threads but cannot yield: in interrupt context
/// there is no schedulable context to save, so preemption is disabled
/// around the handler. Reenabling it on the way out performs any switch
/// the handler made pending, completing the interrupt first.
pub fn dispatch(irq: u32) {
    assert!(!A::intr_enabled());

    let slot = match TABLE.0.get(irq as usize) {
        Some(slot) => slot,
        None => panic!("irq: unexpected vector {}", irq),
    };

    thread::preempt_disable();

    match slot.handler.get() {
        Some(handler) => handler(slot.arg.get()),
        None => panic!("irq: unhandled interrupt {}", irq),
    }

    thread::preempt_enable();
}
