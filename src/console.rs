//! Console glue.
//!
//! The kernel core never touches device registers. For output it relies
//! on a single registered byte sink, used by the diagnostic paths (the
//! panic handler above all), which must be safe to call with interrupts
//! disabled. For input it offers [`Receiver`], the standard shape for a
//! byte-stream driver: the driver's interrupt handler pushes received
//! bytes into a circular buffer and the reading thread sleeps until
//! bytes arrive.

use core::cell::{Cell, UnsafeCell};
use core::fmt;

use spin::Once;

use crate::arch::{Arch, DefaultArch as A};
use crate::cbuf::CBuf;
use crate::errors::{Error, Result};
use crate::thread::{self, ThreadRef};

/// A blocking byte output, typically a polled UART transmitter.
///
/// `write_byte` must not depend on interrupts: panic paths call it with
/// interrupts masked.
pub trait ConsoleSink: Sync {
    fn write_byte(&self, byte: u8);
}

static SINK: Once<&'static dyn ConsoleSink> = Once::new();

/// Install the console sink. One-shot; later calls are ignored.
pub fn set_sink(sink: &'static dyn ConsoleSink) {
    SINK.call_once(|| sink);
}

/// Write bytes to the sink, translating LF to CRLF. Bytes are silently
/// dropped while no sink is installed.
pub fn write_bytes(bytes: &[u8]) {
    let Some(sink) = SINK.get() else {
        return;
    };

    for &byte in bytes {
        if byte == b'\n' {
            sink.write_byte(b'\r');
        }

        sink.write_byte(byte);
    }
}

/// `core::fmt` adapter over the console sink.
pub struct Writer;

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        write_bytes(s.as_bytes());
        Ok(())
    }
}

/// Interrupt-fed receive queue with a single sleeping reader.
///
/// The driver embeds one statically, calls [`Receiver::isr_push`] from
/// its receive interrupt, and serves reads through [`Receiver::read`].
pub struct Receiver<const N: usize> {
    cbuf: UnsafeCell<CBuf<N>>,
    waiter: Cell<Option<ThreadRef>>,
}

// The buffer and waiter slot are only accessed with interrupts and
// preemption disabled.
unsafe impl<const N: usize> Sync for Receiver<N> {}

impl<const N: usize> Receiver<N> {
    pub const fn new() -> Self {
        Self {
            cbuf: UnsafeCell::new(CBuf::new()),
            waiter: Cell::new(None),
        }
    }

    /// Queue a received byte and wake the reader, if any.
    ///
    /// Must be called with interrupts disabled (interrupt context, or a
    /// thread-side interrupt critical section). A full buffer reports
    /// [`Error::Busy`] and drops the byte.
    pub fn isr_push(&self, byte: u8) -> Result<()> {
        assert!(!A::intr_enabled());

        let cbuf = unsafe { &mut *self.cbuf.get() };
        cbuf.push_byte(byte, false)?;

        if let Some(waiter) = self.waiter.get() {
            thread::wakeup(waiter);
        }

        Ok(())
    }

    /// Blocking read of one byte.
    ///
    /// At most one thread may wait at a time; a second concurrent reader
    /// gets [`Error::Busy`].
    pub fn read(&self) -> Result<u8> {
        let primask = thread::preempt_disable_intr_save();

        if self.waiter.get().is_some() {
            thread::preempt_enable_intr_restore(primask);
            return Err(Error::Busy);
        }

        self.waiter.set(Some(thread::current()));

        let byte = loop {
            let cbuf = unsafe { &mut *self.cbuf.get() };

            if let Some(byte) = cbuf.pop_byte() {
                break byte;
            }

            thread::sleep();
        };

        self.waiter.set(None);

        thread::preempt_enable_intr_restore(primask);
        Ok(byte)
    }
}

impl<const N: usize> Default for Receiver<N> {
    fn default() -> Self {
        Self::new()
    }
}
