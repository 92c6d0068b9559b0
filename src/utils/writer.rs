/*
 * Console Writer
 *
 * A `core::fmt::Write` adapter over the UART console, so formatted output
 * works anywhere in the kernel. Each `Writer` holds the console lock for
 * its lifetime.
 */

use core::fmt;

use spin::MutexGuard;

use crate::drivers::uart::{CONSOLE, Pl011};
use crate::io::Mmio;

/// A simple writer that writes to the serial console.
pub struct Writer<'a> {
    serial: MutexGuard<'a, Pl011<Mmio<u32>>>,
}

impl<'a> Writer<'a> {
    /// Creates a new instance of the writer, taking the console lock.
    pub fn new() -> Writer<'a> {
        Writer {
            serial: CONSOLE.lock(),
        }
    }

    /// Writes a byte to the console.
    pub fn write(&mut self, byte: u8) {
        self.serial.write(byte);
    }
}

impl<'a> fmt::Write for Writer<'a> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.write(byte);
        }
        Ok(())
    }
}
