/*
 * Serial Console
 *
 * One PL011 instance behind a spin mutex: the boot console, the logger
 * sink and the shell's input device. The mutex is only ever taken from
 * task context; the IRQ handler does not print.
 */

use spin::Mutex;

use crate::drivers::{PERIPHERAL_BASE, gpio};
use crate::io::Mmio;

pub mod pl011;

pub use pl011::Pl011;

const UART0_BASE: usize = PERIPHERAL_BASE + 0x20_1000;

/// Mutex-protected static instance of the UART0 console.
pub static CONSOLE: Mutex<Pl011<Mmio<u32>>> = Mutex::new(Pl011::new(UART0_BASE));

/// Initializes the console UART.
///
/// Routes GPIO 14/15 to the PL011 (ALT0) with pulls released, then
/// programs the port. Must be called before any logging occurs.
pub fn init() {
    gpio::set_function(14, gpio::PinFunction::Alt0);
    gpio::set_function(15, gpio::PinFunction::Alt0);
    gpio::set_pull((1 << 14) | (1 << 15), gpio::Pull::Off);

    CONSOLE.lock().init();
}

/// Non-blocking read of one byte from the console.
pub fn read_byte() -> Option<u8> {
    CONSOLE.lock().receive()
}
