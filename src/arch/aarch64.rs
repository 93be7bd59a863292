//! AArch64 (ARM64) architecture implementation.
//!
//! Interrupt masking through the DAIF I bit, `wfi`-based idling, and
//! stack-based context switching at EL1.
//!
//! A suspended thread stores its callee-saved registers (x19-x28, the
//! frame pointer and the link register, per the AAPCS64 register usage
//! rules) in a 96-byte frame on its own stack; the thread structure only
//! keeps the resulting stack pointer. Caller-saved registers need no
//! saving because a context switch is always entered through an ordinary
//! function call, so the compiler already assumes they are clobbered.

use core::arch::{asm, naked_asm};

use super::Arch;

/// DAIF I bit: IRQ mask.
const DAIF_IRQ_MASK: u64 = 1 << 7;

/// Size of the callee-saved register frame built by `stack_forge` and
/// consumed by the context restore path: x19-x30, 16-byte aligned.
const FRAME_SIZE: usize = 12 * 8;

/// Frame word indexes for the registers the trampoline cares about.
const FRAME_X19: usize = 0;
const FRAME_X20: usize = 1;
const FRAME_X30: usize = 11;

pub struct Aarch64Arch;

impl Arch for Aarch64Arch {
    fn intr_enable() {
        unsafe {
            asm!("msr daifclr, #2", options(nostack));
        }
    }

    fn intr_disable() {
        unsafe {
            asm!("msr daifset, #2", options(nostack));
        }
    }

    fn intr_enabled() -> bool {
        (read_daif() & DAIF_IRQ_MASK) == 0
    }

    fn intr_save() -> u32 {
        let daif = read_daif();
        Self::intr_disable();
        daif as u32
    }

    fn intr_restore(primask: u32) {
        unsafe {
            asm!("msr daif, {}", in(reg) primask as u64, options(nostack));
        }
    }

    fn idle() {
        unsafe {
            asm!("wfi", options(nomem, nostack));
        }
    }

    fn halt() -> ! {
        Self::intr_disable();

        loop {
            unsafe {
                asm!("wfe", options(nomem, nostack));
            }
        }
    }

    unsafe fn stack_forge(stack: *mut u8, size: usize, entry: usize, arg: usize) -> *mut u8 {
        // The stack pointer must stay 16-byte aligned at all times.
        let top = (stack as usize + size) & !0xf;
        let sp = top - FRAME_SIZE;
        assert!(sp >= stack as usize, "aarch64: stack too small to forge");

        let frame = sp as *mut u64;

        unsafe {
            for i in 0..FRAME_SIZE / 8 {
                frame.add(i).write(0);
            }

            // The restore path only brings back callee-saved registers,
            // so the entry address and its argument travel in x20 and
            // x19; thread_start moves them into place.
            frame.add(FRAME_X19).write(arg as u64);
            frame.add(FRAME_X20).write(entry as u64);
            frame.add(FRAME_X30).write(thread_start as usize as u64);
        }

        sp as *mut u8
    }

    unsafe fn context_switch(prev_sp: *mut *mut u8, next_sp: *mut u8) {
        unsafe { context_switch_asm(prev_sp, next_sp) }
    }

    unsafe fn context_load(sp: *mut u8) -> ! {
        unsafe { context_load_asm(sp) }
    }
}

fn read_daif() -> u64 {
    let daif: u64;

    unsafe {
        asm!("mrs {}, daif", out(reg) daif, options(nomem, nostack));
    }

    daif
}

/// First instructions of every new thread.
///
/// Runs right after the restore path returned into it with the forged
/// frame loaded: the entry function is in x20, its argument in x19.
#[unsafe(naked)]
unsafe extern "C" fn thread_start() -> ! {
    naked_asm!(
        "mov x0, x19",
        "br x20",
    );
}

/// Save the callee-saved registers of the current thread, publish its
/// stack pointer through x0, then adopt the stack in x1 and restore the
/// registers saved there.
#[unsafe(naked)]
unsafe extern "C" fn context_switch_asm(prev_sp: *mut *mut u8, next_sp: *mut u8) {
    naked_asm!(
        "stp x19, x20, [sp, #-96]!",
        "stp x21, x22, [sp, #16]",
        "stp x23, x24, [sp, #32]",
        "stp x25, x26, [sp, #48]",
        "stp x27, x28, [sp, #64]",
        "stp x29, x30, [sp, #80]",
        "mov x9, sp",
        "str x9, [x0]",
        "mov sp, x1",
        "ldp x21, x22, [sp, #16]",
        "ldp x23, x24, [sp, #32]",
        "ldp x25, x26, [sp, #48]",
        "ldp x27, x28, [sp, #64]",
        "ldp x29, x30, [sp, #80]",
        "ldp x19, x20, [sp], #96",
        "ret",
    );
}

/// Restore-only half of the context switch, used to enter the first
/// thread from the bootstrap context.
#[unsafe(naked)]
unsafe extern "C" fn context_load_asm(sp: *mut u8) -> ! {
    naked_asm!(
        "mov sp, x0",
        "ldp x21, x22, [sp, #16]",
        "ldp x23, x24, [sp, #32]",
        "ldp x25, x26, [sp, #48]",
        "ldp x27, x28, [sp, #64]",
        "ldp x29, x30, [sp, #80]",
        "ldp x19, x20, [sp], #96",
        "ret",
    );
}
