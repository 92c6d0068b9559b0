/*
 * Exception Vector Table and IRQ Entry
 *
 * The ARM core takes exceptions through an eight-entry vector table whose
 * base address lives in VBAR. Only the IRQ slot does real work here; every
 * other exception is fatal for this kernel and parks the core.
 *
 * The IRQ entry stub produces exactly the suspended-task frame described
 * in `context`: it banks the interrupted pc/cpsr onto the interrupted
 * task's SVC stack with SRS, switches to SVC mode, and pushes r0-r12 and
 * lr on top. The Rust handler receives that stack pointer and hands back
 * the stack pointer to resume from - the same one for a plain tick, a
 * different task's for a preemptive switch.
 */

use core::arch::{asm, global_asm};

use crate::drivers::timer;
use crate::scheduler;

global_asm!(
    r#"
    .section .text
    .align 5
    .global _vectors
_vectors:
    ldr pc, =_fatal_exception   @ reset
    ldr pc, =_fatal_exception   @ undefined instruction
    ldr pc, =_fatal_exception   @ supervisor call
    ldr pc, =_fatal_exception   @ prefetch abort
    ldr pc, =_fatal_exception   @ data abort
    ldr pc, =_fatal_exception   @ (reserved)
    ldr pc, =_irq_entry         @ irq
    ldr pc, =_fatal_exception   @ fiq

    .global _irq_entry
_irq_entry:
    @ lr points one instruction past the preempted one
    sub   lr, lr, #4
    @ Store {return pc, spsr} onto the SVC-mode stack, then continue there.
    srsdb sp!, #0x13
    cps   #0x13
    push  {r0-r12, lr}
    @ Full frame is on the interrupted task's stack; let Rust decide where
    @ execution continues.
    mov   r0, sp
    bl    irq_handler
    mov   sp, r0
    pop   {r0-r12, lr}
    rfeia sp!

_fatal_exception:
    b     _fatal_exception
    .ltorg
"#
);

unsafe extern "C" {
    static _vectors: u8;
}

/// Point VBAR at the kernel's vector table.
///
/// Must run before the timer IRQ is enabled. The table is 32-byte aligned
/// as the architecture requires.
pub fn install() {
    let base = unsafe { &raw const _vectors } as u32;
    unsafe {
        asm!("mcr p15, 0, {}, c12, c0, 0", in(reg) base, options(nomem, nostack));
    }
    log::info!("Vector table installed at {:#010x}", base);
}

/// C-level IRQ handler.
///
/// Runs with IRQs masked on the interrupted task's stack. Acknowledges the
/// timer if it was the source and gives the scheduler a chance to pick a
/// different task; an unknown source is tolerated by resuming the
/// interrupted context untouched. Nothing called from here may block or
/// yield.
#[unsafe(no_mangle)]
extern "C" fn irq_handler(sp: *mut u32) -> *mut u32 {
    if !timer::handle_interrupt() {
        // Spurious or foreign interrupt: resume as if nothing happened.
        return sp;
    }

    let next = scheduler::preempt(sp);
    if next.is_null() { sp } else { next }
}
