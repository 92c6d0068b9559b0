/*
 * PL011 UART Driver
 *
 * The BCM283x full UART (UART0). Output is the kernel's only console;
 * input feeds the shell. Polled, no interrupts - the console is a pure
 * byte stream.
 */

use bitflags::bitflags;

use crate::io::{Io, Mmio, ReadOnly};

bitflags! {
    /// Flag register fields
    struct FlagFlags: u32 {
        /// Receive FIFO empty
        const RX_EMPTY = 1 << 4;
        /// Transmit FIFO full
        const TX_FULL = 1 << 5;
    }
}

bitflags! {
    /// Control register fields
    struct ControlFlags: u32 {
        const ENABLE = 1 << 0;
        const TX_ENABLE = 1 << 8;
        const RX_ENABLE = 1 << 9;
    }
}

bitflags! {
    /// Line control register fields
    struct LineControlFlags: u32 {
        /// Enable the FIFOs
        const FIFO_EN = 1 << 4;
        /// 8-bit words (both WLEN bits)
        const WORD_8BIT = 3 << 5;
    }
}

/// PL011 register block.
pub struct Pl011<T: Io> {
    data: T,                // Data register, read to receive, write to send
    flags: ReadOnly<T>,     // Flag register
    int_baud: T,            // Integer baud rate divisor
    frac_baud: T,           // Fractional baud rate divisor
    line_ctrl: T,           // Line control
    ctrl: T,                // Control
    int_clear: T,           // Interrupt clear
}

impl Pl011<Mmio<u32>> {
    /// Creates a new UART instance over the register block at `base`.
    ///
    /// # Arguments
    ///
    /// * `base` - Physical base address of the PL011 block.
    pub const fn new(base: usize) -> Pl011<Mmio<u32>> {
        Pl011 {
            data: Mmio::new(base + 0x00),
            flags: ReadOnly::new(Mmio::new(base + 0x18)),
            int_baud: Mmio::new(base + 0x24),
            frac_baud: Mmio::new(base + 0x28),
            line_ctrl: Mmio::new(base + 0x2C),
            ctrl: Mmio::new(base + 0x30),
            int_clear: Mmio::new(base + 0x44),
        }
    }
}

impl<T: Io<Value = u32>> Pl011<T> {
    /// Initializes the UART: 115200 baud, 8N1, FIFOs on.
    ///
    /// The divisor pair assumes the firmware-default 48 MHz UART clock:
    /// 48e6 / (16 * 115200) = 26.04, so integer 26, fraction 0.04 * 64 = 3.
    /// Pin routing is the caller's job (GPIO 14/15 to ALT0).
    pub fn init(&mut self) {
        self.ctrl.write(0);
        self.int_clear.write(0x7FF);
        self.int_baud.write(26);
        self.frac_baud.write(3);
        self.line_ctrl
            .write((LineControlFlags::FIFO_EN | LineControlFlags::WORD_8BIT).bits());
        self.ctrl
            .write((ControlFlags::ENABLE | ControlFlags::TX_ENABLE | ControlFlags::RX_ENABLE).bits());
    }

    fn flags(&self) -> FlagFlags {
        FlagFlags::from_bits_truncate(self.flags.read())
    }

    /// Sends a byte, waiting for transmit FIFO room.
    pub fn send(&mut self, data: u8) {
        while self.flags().contains(FlagFlags::TX_FULL) {}
        self.data.write(data as u32);
    }

    /// Returns a received byte, or None if the receive FIFO is empty.
    pub fn receive(&mut self) -> Option<u8> {
        if self.flags().contains(FlagFlags::RX_EMPTY) {
            None
        } else {
            Some((self.data.read() & 0xFF) as u8)
        }
    }

    /// Writes a byte with console conventions applied.
    ///
    /// Newlines become CR-LF; backspace/delete rub out the previous cell.
    pub fn write(&mut self, b: u8) {
        match b {
            8 | 0x7F => {
                self.send(8);
                self.send(b' ');
                self.send(8);
            }
            b'\n' => {
                self.send(b'\r');
                self.send(b'\n');
            }
            _ => self.send(b),
        }
    }
}
