/*
 * VideoCore Property Mailbox
 *
 * The firmware owns power and clock management on this SoC; the ARM asks
 * for both over the mailbox property channel. The SD driver needs two
 * tags: "set power state" to switch the card slot on, and "get clock rate"
 * to learn the EMMC base clock before computing divider values.
 *
 * The property buffer must be 16-byte aligned because the low four bits of
 * the mailbox write register carry the channel number.
 */

use spin::Mutex;

use crate::drivers::{PERIPHERAL_BASE, timer};
use crate::io::{Io, Mmio};

const MBOX_BASE: usize = PERIPHERAL_BASE + 0xB880;
const MBOX_READ: usize = MBOX_BASE + 0x00;
const MBOX_STATUS: usize = MBOX_BASE + 0x18;
const MBOX_WRITE: usize = MBOX_BASE + 0x20;

const MBOX_FULL: u32 = 0x8000_0000;
const MBOX_EMPTY: u32 = 0x4000_0000;

/// Property tags channel.
const CHANNEL_PROPERTY: u32 = 8;

/// Firmware acknowledges a request by rewriting the code word with this.
const CODE_RESPONSE_OK: u32 = 0x8000_0000;

const TAG_SET_POWER_STATE: u32 = 0x0002_8001;
const TAG_GET_CLOCK_RATE: u32 = 0x0003_0002;
const TAG_END: u32 = 0;

/// Power domain ids for `set_power_state`.
pub const POWER_DEVICE_SD: u32 = 0;

/// Clock ids for `get_clock_rate`.
pub const CLOCK_EMMC: u32 = 1;

/// Errors reported by the mailbox interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxError {
    /// The firmware rejected the request or never set the response code.
    NoResponse,
}

#[repr(C, align(16))]
struct PropertyBuffer([u32; 8]);

/// The single property buffer, serialized by a mutex. Mailbox traffic only
/// happens at init time from task context.
static BUFFER: Mutex<PropertyBuffer> = Mutex::new(PropertyBuffer([0; 8]));

fn call(buffer: &mut PropertyBuffer) -> Result<(), MailboxError> {
    let mut status = Mmio::<u32>::new(MBOX_STATUS);
    let mut write = Mmio::<u32>::new(MBOX_WRITE);
    let mut read = Mmio::<u32>::new(MBOX_READ);

    let addr = (&raw const buffer.0 as usize as u32) & !0xF;

    while status.read() & MBOX_FULL != 0 {
        timer::delay_us(1);
    }
    write.write(addr | CHANNEL_PROPERTY);

    loop {
        while status.read() & MBOX_EMPTY != 0 {
            timer::delay_us(1);
        }
        if read.read() == addr | CHANNEL_PROPERTY {
            return if buffer.0[1] == CODE_RESPONSE_OK {
                Ok(())
            } else {
                Err(MailboxError::NoResponse)
            };
        }
    }
}

/// Ask the firmware to power a device domain on or off.
///
/// Waits for the state to settle (the WAIT bit) before the firmware
/// responds. Returns the state word the firmware reports back.
pub fn set_power_state(device: u32, on: bool) -> Result<u32, MailboxError> {
    let mut buffer = BUFFER.lock();
    // ON plus WAIT-for-stable.
    let state = if on { 3 } else { 0 };
    buffer.0 = [
        8 * 4,
        0,
        TAG_SET_POWER_STATE,
        8,
        8,
        device,
        state,
        TAG_END,
    ];
    call(&mut buffer)?;
    Ok(buffer.0[6])
}

/// Query the current rate of a firmware-managed clock, in Hz.
pub fn get_clock_rate(clock: u32) -> Result<u32, MailboxError> {
    let mut buffer = BUFFER.lock();
    buffer.0 = [8 * 4, 0, TAG_GET_CLOCK_RATE, 8, 4, clock, 0, TAG_END];
    call(&mut buffer)?;
    Ok(buffer.0[6])
}
