/*
 * Piko Kernel Main Entry Point
 *
 * A bare-metal preemptive kernel for BCM283x-class 32-bit ARM boards. The
 * firmware loads the image at 0x8000 and jumps to `_start` on every core;
 * core 0 sets up a boot stack, zeroes BSS and enters `kernel_main`, which
 * brings up the console, the SD card, the scheduler and the timer, then
 * hands the CPU to the first task. The other cores are parked.
 *
 * On a hosted target this file collapses to a stub: the kernel is built
 * there only so its architecture-independent logic can run under
 * `cargo test`.
 */

#![cfg_attr(target_arch = "arm", no_std, no_main)]
#![allow(dead_code)]

#[cfg(target_arch = "arm")]
extern crate rlibc;

mod arch;
mod block;
mod drivers;
mod io;
mod scheduler;
mod selftest;
mod sync;
mod utils;

#[cfg(target_arch = "arm")]
use core::panic::PanicInfo;

#[cfg(target_arch = "arm")]
use crate::serial_println;

use crate::drivers::gpio;

/// ACT LED on this board.
const ACT_LED_PIN: u32 = 47;

#[repr(C, align(16))]
pub struct AlignedBootStack([u8; 16 * 1024]);

/// Stack used from `_start` until the scheduler takes over.
#[unsafe(no_mangle)]
pub static mut BOOT_STACK: AlignedBootStack = AlignedBootStack([0; 16 * 1024]);

/// ===============================
///  EARLY ENTRY POINT (_start)
/// ===============================
///
/// Called by the firmware on ALL cores with IRQs in an unknown state.
/// Required to:
///   - Park every core except core 0
///   - Switch core 0 onto the 16 KiB boot stack
///   - Zero BSS (the loader does not)
///   - Call into Rust's `kernel_main`
///
#[cfg(target_arch = "arm")]
#[unsafe(naked)]
#[unsafe(no_mangle)]
#[unsafe(link_section = ".text.boot")]
pub unsafe extern "C" fn _start() -> ! {
    core::arch::naked_asm!(
        "cpsid if",
        // MPIDR low bits hold the core number; only core 0 boots.
        "mrc   p15, 0, r0, c0, c0, 5",
        "ands  r0, r0, #3",
        "bne   2f",
        // Core 0: switch to the boot stack.
        "ldr   r0, =BOOT_STACK",
        "add   r0, r0, #{stack_size}",
        "mov   sp, r0",
        // Zero BSS.
        "ldr   r1, =__bss_start",
        "ldr   r2, =__bss_end",
        "mov   r3, #0",
        "1:",
        "cmp   r1, r2",
        "bhs   3f",
        "str   r3, [r1], #4",
        "b     1b",
        "3:",
        "bl    kernel_main",
        // Secondary cores (and an impossible return) park here.
        "2:",
        "wfe",
        "b     2b",
        ".ltorg",
        stack_size = const 16 * 1024,
    );
}

/// ===============================
///  RUST KERNEL ENTRY POINT
/// ===============================
///
/// Runs on the boot stack with IRQs masked. Initialization order matters:
/// console first so everything after it can log, vectors before the timer
/// can fire, and the timer unmasked only once at least one task exists.
#[cfg(target_arch = "arm")]
#[unsafe(no_mangle)]
pub extern "C" fn kernel_main() -> ! {
    drivers::uart::init();
    utils::logger::init();

    serial_println!();
    serial_println!("================================");
    serial_println!("  piko kernel");
    serial_println!("================================");

    arch::armv7::vectors::install();

    if let Err(err) = drivers::sd::init() {
        // The kernel keeps booting; the shell's `sd` command will report
        // the absence.
        log::error!("sd: initialization failed ({:?})", err);
    }

    scheduler::init();
    scheduler::spawn("idle", idle_task, 0).expect("task table empty at boot");
    scheduler::spawn("shell", utils::shell::shell_task, 1).expect("task table empty at boot");
    scheduler::spawn("heartbeat", heartbeat_task, 1).expect("task table empty at boot");

    drivers::timer::init();
    arch::interrupts::enable();

    scheduler::start()
}

/// Always-runnable task so the IRQ-time selection never comes up empty.
fn idle_task() {
    loop {
        scheduler::yield_now();
        arch::interrupts::wait_for_interrupt();
    }
}

/// Blink the ACT LED; doubles as a visible liveness check for the
/// scheduler's sleep/wake path.
fn heartbeat_task() {
    gpio::set_function(ACT_LED_PIN, gpio::PinFunction::Output);
    loop {
        gpio::set_high(ACT_LED_PIN);
        scheduler::sleep(50);
        gpio::set_low(ACT_LED_PIN);
        scheduler::sleep(50);
    }
}

#[cfg(target_arch = "arm")]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    arch::interrupts::disable();

    if let Some(location) = info.location() {
        log::error!(
            "PANIC at {}:{}: {}",
            location.file(),
            location.line(),
            info.message()
        );
    } else {
        log::error!("PANIC: {}", info.message());
    }

    loop {
        arch::interrupts::wait_for_interrupt();
    }
}

/// Hosted builds exist only to run the unit tests.
#[cfg(not(target_arch = "arm"))]
fn main() {}
