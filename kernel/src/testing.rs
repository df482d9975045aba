//! Hosted test scaffolding
//!
//! The kernel is a state machine: tests create threads, drive the
//! scheduler and assert on states instead of running thread bodies. This
//! module provides the controls that make that possible on a host:
//! serializing tests against the process-global kernel state, resetting
//! that state, picking the "current" thread, and simulating interrupt
//! context.
//!
//! Only built for hosted targets; none of this exists on bare metal.

use std::boxed::Box;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::vec::Vec;

use crate::arch;
use crate::sched::{self, Pid, ThreadState};
use crate::tasklet;
use crate::thread::{self, CreateFlags};

static TEST_LOCK: Mutex<()> = Mutex::new(());

/// Guard serializing a test against all others in the process.
pub struct TestGuard {
    _guard: MutexGuard<'static, ()>,
}

/// Take the global test lock and reset every piece of kernel state.
/// Call first in every test.
pub fn lock() -> TestGuard {
    let guard = TEST_LOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    reset();
    TestGuard { _guard: guard }
}

/// Reset scheduler, tasklet, power and interrupt state.
pub fn reset() {
    arch::reset();
    sched::with_kernel(|k| {
        *k = sched::Kernel::new();
    });
    tasklet::reset();
    crate::pm::reset();
}

/// Leak a vector into the static storage a kernel object expects.
pub fn leak<T>(values: Vec<T>) -> &'static mut [T] {
    Box::leak(values.into_boxed_slice())
}

/// Leak a single value, e.g. a bus subscriber entry.
pub fn leak_value<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

/// A fresh static stack for `thread::create`.
pub fn stack(size: usize) -> &'static mut [u8] {
    leak(std::vec![0u8; size])
}

fn noop_entry(_arg: *mut ()) {}

/// Create a thread that never actually runs code, without yielding to it.
pub fn create_thread(priority: u8, name: &'static str) -> Pid {
    thread::create(
        stack(256),
        priority,
        CreateFlags::WOUT_YIELD,
        noop_entry,
        core::ptr::null_mut(),
        name,
    )
    .expect("test thread creation failed")
}

/// Make a runnable thread the running one, parking the previous runner
/// as `Pending`. Tests use this to act on behalf of a given thread.
pub fn set_active(pid: Pid) {
    sched::with_kernel(|k| {
        let previous = k.active;
        if let Some(tcb) = k.table.get_mut(previous) {
            if tcb.state == ThreadState::Running {
                tcb.state = ThreadState::Pending;
            }
        }
        let tcb = k.table.thread_mut(pid);
        assert!(
            tcb.state.is_on_runqueue(),
            "set_active({}) on a blocked thread",
            pid
        );
        tcb.state = ThreadState::Running;
        k.active = pid;
    });
}

/// Enter simulated interrupt context.
pub fn enter_isr() {
    arch::enter_isr();
}

/// Leave simulated interrupt context, honoring a pending context switch
/// request the way a real interrupt return would.
pub fn exit_isr() {
    arch::exit_isr();
    if sched::context_switch_requested() {
        sched::run();
    }
}

/// Run `f` in simulated interrupt context.
pub fn in_isr<R>(f: impl FnOnce() -> R) -> R {
    enter_isr();
    let result = f();
    exit_isr();
    result
}

/// The power mode most recently selected by the idle path, if any.
pub fn last_pm_mode() -> Option<usize> {
    arch::last_pm_mode()
}
