/*
 * Input/Output System
 *
 * This module provides the low-level register access layer used by every
 * driver in the kernel. All device registers on this board are memory
 * mapped, so the only implementation is volatile MMIO.
 */

pub mod mmio;

pub use mmio::{Io, Mmio, ReadOnly};
