/*
 * ARMv7-A Architecture Support
 *
 * This module contains everything that is specific to the 32-bit ARM core:
 * CPSR-based interrupt masking, the suspended-task frame and the context
 * switch primitive, and the exception vector table. (The boot shim lives
 * next to `kernel_main` in main.rs.)
 *
 * The frame layout in `context` is compiled for every target so the
 * scheduler can build task frames (and the unit tests can inspect them) on
 * the host; the assembly stubs only exist when targeting ARM.
 */

pub mod context;

#[cfg(target_arch = "arm")]
pub mod interrupts;
#[cfg(target_arch = "arm")]
pub mod vectors;
