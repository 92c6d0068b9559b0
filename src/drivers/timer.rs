/*
 * Timer Driver and Tick Accounting
 *
 * Two distinct pieces of hardware live here:
 *
 * - The ARM interval timer (peripheral +0xB000) raises the periodic
 *   scheduling tick. Its prescaler divides the 250 MHz APB clock down to
 *   1 MHz, and LOAD/RELOAD give a 10 ms period. The IRQ handler
 *   acknowledges it and bumps the global tick counter.
 *
 * - The free-running system timer (peripheral +0x3000) counts microseconds
 *   from power-on. Drivers that need short bounded waits (GPIO pull
 *   sequencing, the SD state machine) read its counter instead of spinning
 *   on instruction loops, so the waits survive compiler optimization and
 *   CPU clock changes.
 *
 * The tick counter wraps after ~497 days at 10 ms; deadline comparisons go
 * through `deadline_reached`, which is wrap-safe.
 */

use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use crate::drivers::PERIPHERAL_BASE;
use crate::io::{Io, Mmio};

const ARM_TIMER_BASE: usize = PERIPHERAL_BASE + 0xB000;
const ARM_TIMER_LOAD: usize = ARM_TIMER_BASE + 0x400;
const ARM_TIMER_CTRL: usize = ARM_TIMER_BASE + 0x408;
const ARM_TIMER_IRQ_CLR: usize = ARM_TIMER_BASE + 0x40C;
const ARM_TIMER_RAW_IRQ: usize = ARM_TIMER_BASE + 0x410;
const ARM_TIMER_RELOAD: usize = ARM_TIMER_BASE + 0x418;
const ARM_TIMER_PREDIV: usize = ARM_TIMER_BASE + 0x41C;

/// Basic-interrupt enable register; bit 0 is the ARM timer.
const IRQ_ENABLE_BASIC: usize = ARM_TIMER_BASE + 0x218;

const SYSTIMER_BASE: usize = PERIPHERAL_BASE + 0x3000;
const SYSTIMER_CLO: usize = SYSTIMER_BASE + 0x04;

bitflags! {
    /// ARM timer control register fields.
    struct TimerControl: u32 {
        /// 23-bit counter mode (instead of 16-bit).
        const WIDE = 1 << 1;
        /// Timer interrupt enable.
        const IRQ_EN = 1 << 5;
        /// Timer enable.
        const ENABLE = 1 << 7;
    }
}

/// Scheduling tick period.
pub const TICK_PERIOD_MS: u32 = 10;

/// Prescaler for the ARM timer: 250 MHz / (249 + 1) = 1 MHz.
const PRESCALE: u32 = 249;

/// Timer reload value: counts of the 1 MHz post-divider clock per tick.
const TICKS_LOAD: u32 = TICK_PERIOD_MS * 1000;

/// Count of timer IRQs since boot. Written only at IRQ time.
static TICKS: AtomicU32 = AtomicU32::new(0);

/// Program the ARM timer for the periodic scheduling tick.
///
/// The timer free-runs with auto-reload; the IRQ handler only has to
/// acknowledge it. IRQs stay masked at the CPU until the caller unmasks
/// them.
pub fn init() {
    let mut ctrl = Mmio::<u32>::new(ARM_TIMER_CTRL);
    ctrl.write(0);
    Mmio::<u32>::new(ARM_TIMER_LOAD).write(TICKS_LOAD);
    Mmio::<u32>::new(ARM_TIMER_RELOAD).write(TICKS_LOAD);
    Mmio::<u32>::new(ARM_TIMER_PREDIV).write(PRESCALE);
    Mmio::<u32>::new(ARM_TIMER_IRQ_CLR).write(0);
    Mmio::<u32>::new(IRQ_ENABLE_BASIC).write(1 << 0);
    ctrl.write((TimerControl::ENABLE | TimerControl::IRQ_EN | TimerControl::WIDE).bits());

    log::info!("ARM timer started, {} ms tick", TICK_PERIOD_MS);
}

/// IRQ-time service routine.
///
/// Returns true if the ARM timer was pending (the interrupt is then
/// acknowledged and the tick counter bumped), false for any other source.
/// Must not block.
pub fn handle_interrupt() -> bool {
    if Mmio::<u32>::new(ARM_TIMER_RAW_IRQ).read() & 1 == 0 {
        return false;
    }
    Mmio::<u32>::new(ARM_TIMER_IRQ_CLR).write(0);
    TICKS.fetch_add(1, Ordering::Relaxed);
    true
}

/// Ticks elapsed since boot.
#[inline]
pub fn ticks() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

/// Pin the tick counter to a known value for scheduler tests.
#[cfg(test)]
pub(crate) fn set_ticks_for_test(value: u32) {
    TICKS.store(value, Ordering::Relaxed);
}

/// Whole seconds of uptime, derived from the tick counter.
pub fn uptime_secs() -> u32 {
    ticks() / (1000 / TICK_PERIOD_MS)
}

/// Wrap-safe deadline test over the 32-bit tick counter.
///
/// `now` has reached `deadline` iff the signed distance between them is
/// non-negative, i.e. `now - deadline` lands in the lower half of the
/// unsigned range.
#[inline]
pub fn deadline_reached(now: u32, deadline: u32) -> bool {
    now.wrapping_sub(deadline) < 0x8000_0000
}

/// Microsecond reading of the free-running system timer.
#[inline]
fn system_counter() -> u32 {
    Mmio::<u32>::new(SYSTIMER_CLO).read()
}

/// Busy-wait for `us` microseconds against the system timer.
///
/// Only for driver-internal waits; task code sleeps through the scheduler.
pub fn delay_us(us: u32) {
    let start = system_counter();
    while system_counter().wrapping_sub(start) < us {}
}

/// Busy-wait for `ms` milliseconds against the system timer.
pub fn delay_ms(ms: u32) {
    delay_us(ms * 1000);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_simple() {
        assert!(deadline_reached(100, 100));
        assert!(deadline_reached(101, 100));
        assert!(!deadline_reached(99, 100));
    }

    #[test]
    fn deadline_across_wrap() {
        // Deadline just past the wrap point, now just before it.
        assert!(!deadline_reached(0xFFFF_FFF0, 0x0000_0005));
        // Now wrapped past the deadline.
        assert!(deadline_reached(0x0000_0006, 0x0000_0005));
        // Deadline set before the wrap, reached after it.
        assert!(deadline_reached(0x0000_0002, 0xFFFF_FFFE));
    }

    #[test]
    fn tick_to_seconds() {
        assert_eq!(1000 / TICK_PERIOD_MS, 100);
    }
}
