//! Hosted (simulated) port
//!
//! Used whenever the crate is built for a target that has an operating
//! system, which is how the test suite runs. Interrupt state is modelled
//! with process-global atomics and a "context switch" runs the scheduler's
//! bookkeeping half only. Thread stacks are recorded but never executed on.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::sched::tcb::ThreadFn;

static IRQ_ENABLED: AtomicBool = AtomicBool::new(true);
static IN_ISR: AtomicBool = AtomicBool::new(false);

/// Last power mode handed to [`pm_set`], `usize::MAX` before the first call.
static LAST_PM_MODE: AtomicUsize = AtomicUsize::new(usize::MAX);

/// Mask interrupt delivery, returning the previous enable state.
pub fn irq_disable() -> bool {
    IRQ_ENABLED.swap(false, Ordering::SeqCst)
}

/// Restore the interrupt enable state returned by [`irq_disable`].
pub fn irq_restore(prev: bool) {
    IRQ_ENABLED.store(prev, Ordering::SeqCst);
}

/// Whether interrupt delivery is currently enabled.
pub fn irq_is_enabled() -> bool {
    IRQ_ENABLED.load(Ordering::SeqCst)
}

/// Whether the CPU is executing an interrupt service routine.
pub fn irq_is_in() -> bool {
    IN_ISR.load(Ordering::SeqCst)
}

/// Request an immediate context switch.
///
/// On hardware this pends the lowest-priority software interrupt and the
/// switch happens on exception return. Here the scheduler's pick runs
/// inline; the caller keeps executing, which is exactly what single
/// threaded tests need to drive the state machine.
pub fn trigger_context_switch() {
    crate::sched::run();
}

/// Idle the CPU until the next interrupt. A no-op in the simulation.
pub fn wait_for_interrupt() {}

/// Record the selected power mode so tests can observe it.
pub fn pm_set(mode: usize) {
    LAST_PM_MODE.store(mode, Ordering::SeqCst);
}

/// Prepare the initial stack frame of a new thread.
///
/// The simulation never runs thread bodies, so the "frame" is just the
/// aligned top of the stack.
pub fn init_stack(_entry: ThreadFn, _arg: *mut (), stack: *mut u8, size: usize) -> *mut u8 {
    let top = stack as usize + size;
    (top & !0xf) as *mut u8
}

// -------------------------------------------------------------------------
// Simulation controls (used by crate::testing)
// -------------------------------------------------------------------------

/// Mark the beginning of a simulated interrupt service routine.
pub(crate) fn enter_isr() {
    IN_ISR.store(true, Ordering::SeqCst);
}

/// Mark the end of a simulated interrupt service routine.
pub(crate) fn exit_isr() {
    IN_ISR.store(false, Ordering::SeqCst);
}

/// Reset the simulated interrupt gate to the power-on state.
pub(crate) fn reset() {
    IRQ_ENABLED.store(true, Ordering::SeqCst);
    IN_ISR.store(false, Ordering::SeqCst);
    LAST_PM_MODE.store(usize::MAX, Ordering::SeqCst);
}

/// The mode most recently passed to [`pm_set`], if any.
pub(crate) fn last_pm_mode() -> Option<usize> {
    match LAST_PM_MODE.load(Ordering::SeqCst) {
        usize::MAX => None,
        mode => Some(mode),
    }
}
