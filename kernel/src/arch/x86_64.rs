//! Bare-metal x86_64 port
//!
//! Interrupt gating maps to the RFLAGS interrupt flag. The in-ISR flag is
//! maintained by the interrupt entry glue, which must call
//! [`set_in_isr`] around handler dispatch and check
//! [`crate::sched::context_switch_requested`] before returning.

use core::sync::atomic::{AtomicBool, Ordering};

use x86_64::instructions::{hlt, interrupts};

use crate::sched::tcb::ThreadFn;

static IN_ISR: AtomicBool = AtomicBool::new(false);

/// Mask interrupt delivery, returning the previous enable state.
pub fn irq_disable() -> bool {
    let was_enabled = interrupts::are_enabled();
    interrupts::disable();
    was_enabled
}

/// Restore the interrupt enable state returned by [`irq_disable`].
pub fn irq_restore(prev: bool) {
    if prev {
        interrupts::enable();
    }
}

/// Whether interrupt delivery is currently enabled.
pub fn irq_is_enabled() -> bool {
    interrupts::are_enabled()
}

/// Whether the CPU is executing an interrupt service routine.
pub fn irq_is_in() -> bool {
    IN_ISR.load(Ordering::Relaxed)
}

/// Maintained by the interrupt entry glue.
pub fn set_in_isr(in_isr: bool) {
    IN_ISR.store(in_isr, Ordering::Relaxed);
}

/// Request an immediate context switch.
///
/// Runs the scheduler pick inline; the register-level switch to the picked
/// thread's stack is performed by the interrupt return path.
pub fn trigger_context_switch() {
    crate::sched::run();
}

/// Idle the CPU until the next interrupt.
pub fn wait_for_interrupt() {
    hlt();
}

/// Enter the given power mode. All modes map to `hlt` on this port.
pub fn pm_set(_mode: usize) {
    hlt();
}

/// Prepare the initial stack frame of a new thread.
///
/// Lays out the frame the context-switch return path expects: the entry
/// trampoline address on top, with the argument in the slot the trampoline
/// pops into `rdi`.
pub fn init_stack(entry: ThreadFn, arg: *mut (), stack: *mut u8, size: usize) -> *mut u8 {
    let top = (stack as usize + size) & !0xf;
    let frame = (top - 2 * core::mem::size_of::<usize>()) as *mut usize;
    // SAFETY: the caller hands over exclusive ownership of the stack
    // memory and `frame` points at least two words below its aligned top.
    unsafe {
        frame.write(entry as usize);
        frame.add(1).write(arg as usize);
    }
    frame as *mut u8
}
