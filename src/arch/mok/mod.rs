/*
 * Mok Port
 *
 * Stand-in architecture port for hosted builds. The kernel's logic - the
 * scheduler policy, the sync primitives, the SD protocol math - is
 * architecture independent and unit-tested on the build host; this module
 * supplies the few hooks that logic expects from the real port.
 *
 * The mok context switch does nothing: a "switch" simply returns to the
 * caller, which is exactly what the scheduler tests want to observe state
 * transitions without giving up the test thread.
 */

pub mod interrupts {
    use core::sync::atomic::{AtomicBool, Ordering};

    static ENABLED: AtomicBool = AtomicBool::new(true);

    /// Mok enable IRQs.
    pub fn enable() {
        ENABLED.store(true, Ordering::SeqCst);
    }

    /// Mok disable IRQs.
    pub fn disable() {
        ENABLED.store(false, Ordering::SeqCst);
    }

    /// Mok IRQ mask state.
    pub fn are_enabled() -> bool {
        ENABLED.load(Ordering::SeqCst)
    }

    /// Run a closure with the mok mask flag held.
    pub fn without_interrupts<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = DisableInterrupts::new();
        f()
    }

    /// Mok wait-for-interrupt: nothing to wait for.
    pub fn wait_for_interrupt() {}

    /// RAII mask guard mirroring the ARMv7 port.
    pub struct DisableInterrupts {
        were_enabled: bool,
    }

    impl DisableInterrupts {
        pub fn new() -> Self {
            let were_enabled = are_enabled();
            if were_enabled {
                disable();
            }
            Self { were_enabled }
        }
    }

    impl Drop for DisableInterrupts {
        fn drop(&mut self) {
            if self.were_enabled {
                enable();
            }
        }
    }
}

/// Mok context switch: keep running the caller.
///
/// # Safety
///
/// Trivially safe; the signature matches the ARMv7 primitive.
pub unsafe extern "C" fn context_switch(_old_sp_slot: *mut *mut u32, _new_sp: *mut u32) {}
