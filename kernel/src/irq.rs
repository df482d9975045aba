//! Interrupt gate
//!
//! Masking and restoring interrupt delivery is the only mutual-exclusion
//! primitive the kernel core relies on. Every mutation of shared kernel
//! state happens inside a critical section obtained here, and the held
//! duration is bounded by a walk over a single wait or subscriber list.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch;

/// Opaque saved interrupt state, returned by [`disable`].
#[must_use = "dropping the saved state leaves interrupts masked"]
pub struct IrqState(bool);

/// Disable interrupt delivery and return the prior state.
#[inline]
pub fn disable() -> IrqState {
    IrqState(arch::irq_disable())
}

/// Restore the interrupt state saved by a matching [`disable`].
#[inline]
pub fn restore(state: IrqState) {
    arch::irq_restore(state.0);
}

/// True while executing an interrupt service routine.
#[inline]
pub fn is_in() -> bool {
    arch::irq_is_in()
}

/// True if interrupt delivery is currently enabled.
#[inline]
pub fn is_enabled() -> bool {
    arch::irq_is_enabled()
}

/// RAII critical section: interrupts are masked for the guard's lifetime
/// and the previous state is restored on drop.
pub struct IrqGuard {
    prev: bool,
}

impl IrqGuard {
    #[inline]
    pub fn new() -> Self {
        IrqGuard {
            prev: arch::irq_disable(),
        }
    }
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IrqGuard {
    #[inline]
    fn drop(&mut self) {
        arch::irq_restore(self.prev);
    }
}

/// A cell whose contents may only be reached with interrupts masked.
///
/// This is the single legal way to obtain `&mut` to shared kernel
/// structures (the scheduler state, waiter lists, the mailbox index
/// buffer). [`IrqLock::with`] masks interrupts, runs the closure, and
/// restores the previous state. Nesting across *different* locks is fine
/// (the gate is save/restore); re-entering the *same* lock would alias the
/// exclusive borrow and is caught at runtime.
pub struct IrqLock<T> {
    taken: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: the contents are only reachable through `with`, which masks
// interrupts and excludes re-entry, and the kernel runs on a single CPU.
unsafe impl<T: Send> Sync for IrqLock<T> {}

impl<T> IrqLock<T> {
    pub const fn new(value: T) -> Self {
        IrqLock {
            taken: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Run `f` with exclusive access to the contents, interrupts masked.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let _guard = IrqGuard::new();
        if self.taken.swap(true, Ordering::Relaxed) {
            panic!("IrqLock re-entered");
        }
        let _taken = TakenGuard(&self.taken);
        // SAFETY: interrupts are masked, the CPU is the only one, and the
        // `taken` flag has just excluded re-entry, so no other `&mut` to
        // the contents can exist for the duration of `f`.
        let value = unsafe { &mut *self.value.get() };
        f(value)
    }
}

/// Clears the re-entry flag even if the closure unwinds.
struct TakenGuard<'a>(&'a AtomicBool);

impl Drop for TakenGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Relaxed);
    }
}
