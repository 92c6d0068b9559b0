/*
 * GPIO Pin Controller
 *
 * Function select, level control and pull-up/down programming for the
 * BCM283x GPIO block. The UART claims pins 14/15 (ALT0), the EMMC host
 * claims pins 48-53 (ALT3) and the heartbeat task drives the ACT LED; all
 * of them go through here rather than poking GPFSELn themselves.
 */

use crate::drivers::{PERIPHERAL_BASE, timer};
use crate::io::{Io, Mmio};

const GPIO_BASE: usize = PERIPHERAL_BASE + 0x20_0000;

const GPFSEL0: usize = GPIO_BASE + 0x00;
const GPSET0: usize = GPIO_BASE + 0x1C;
const GPSET1: usize = GPIO_BASE + 0x20;
const GPCLR0: usize = GPIO_BASE + 0x28;
const GPCLR1: usize = GPIO_BASE + 0x2C;
const GPLEV0: usize = GPIO_BASE + 0x34;
const GPLEV1: usize = GPIO_BASE + 0x38;
const GPPUD: usize = GPIO_BASE + 0x94;
const GPPUDCLK0: usize = GPIO_BASE + 0x98;
const GPPUDCLK1: usize = GPIO_BASE + 0x9C;

/// Alternate function encodings for GPFSELn fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PinFunction {
    Input = 0b000,
    Output = 0b001,
    Alt0 = 0b100,
    Alt1 = 0b101,
    Alt2 = 0b110,
    Alt3 = 0b111,
    Alt4 = 0b011,
    Alt5 = 0b010,
}

/// Internal resistor selection for `set_pull`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Pull {
    Off = 0,
    Down = 1,
    Up = 2,
}

/// Route a pin to one of its functions.
///
/// Each GPFSEL register covers ten pins, three bits per pin.
pub fn set_function(pin: u32, function: PinFunction) {
    let mut fsel = Mmio::<u32>::new(GPFSEL0 + (pin as usize / 10) * 4);
    let shift = (pin % 10) * 3;
    let mut val = fsel.read();
    val &= !(0b111 << shift);
    val |= (function as u32) << shift;
    fsel.write(val);
}

/// Drive an output pin high.
pub fn set_high(pin: u32) {
    if pin < 32 {
        Mmio::<u32>::new(GPSET0).write(1 << pin);
    } else {
        Mmio::<u32>::new(GPSET1).write(1 << (pin - 32));
    }
}

/// Drive an output pin low.
pub fn set_low(pin: u32) {
    if pin < 32 {
        Mmio::<u32>::new(GPCLR0).write(1 << pin);
    } else {
        Mmio::<u32>::new(GPCLR1).write(1 << (pin - 32));
    }
}

/// Read the current level of a pin.
pub fn read(pin: u32) -> bool {
    let lev = if pin < 32 {
        Mmio::<u32>::new(GPLEV0).read() >> pin
    } else {
        Mmio::<u32>::new(GPLEV1).read() >> (pin - 32)
    };
    lev & 1 != 0
}

/// Apply a pull resistor setting to a set of pins.
///
/// `pins` is a bitmask over GPIO numbers 0-53. The GPPUD sequence needs a
/// couple of microseconds of setup and hold around the clock pulse; the
/// delays read the free-running system timer.
pub fn set_pull(pins: u64, pull: Pull) {
    let mut pud = Mmio::<u32>::new(GPPUD);
    let mut clk0 = Mmio::<u32>::new(GPPUDCLK0);
    let mut clk1 = Mmio::<u32>::new(GPPUDCLK1);

    pud.write(pull as u32);
    timer::delay_us(5);
    clk0.write(pins as u32);
    clk1.write((pins >> 32) as u32);
    timer::delay_us(5);
    clk0.write(0);
    clk1.write(0);
    pud.write(0);
}
