/*
 * Architecture Abstraction Layer
 *
 * This module selects the architecture port the rest of the kernel talks
 * to. On the real board that is the ARMv7-A port (interrupt masking,
 * context switching, the exception vector table). Everywhere else the mok
 * port supplies no-op stand-ins, so the architecture-independent kernel
 * logic still compiles and its unit tests run on the build host.
 */

pub mod armv7;
#[cfg(not(target_arch = "arm"))]
pub mod mok;

#[cfg(target_arch = "arm")]
pub use armv7::interrupts;
#[cfg(not(target_arch = "arm"))]
pub use mok::interrupts;

#[cfg(target_arch = "arm")]
pub use armv7::context::context_switch;
#[cfg(not(target_arch = "arm"))]
pub use mok::context_switch;
