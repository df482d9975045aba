//! Kernel bring-up
//!
//! Boot creates the idle thread and performs the first scheduler
//! dispatch. The idle thread must exist before anything can block: it is
//! the thread of last resort the scheduler falls back to, and it drives
//! the power management loop.

use crate::arch;
use crate::error::KernelResult;
use crate::pm;
use crate::sched::{self, Pid};
use crate::thread::{self, CreateFlags, PRIORITY_IDLE};

fn idle_loop(_arg: *mut ()) {
    loop {
        pm::set_lowest();
        arch::wait_for_interrupt();
    }
}

/// Bring the kernel up: install the log sink, create the idle thread and
/// dispatch for the first time. Call exactly once, before any other
/// thread is created.
pub fn init(idle_stack: &'static mut [u8]) -> KernelResult<Pid> {
    crate::klog::init();

    let idle = thread::create(
        idle_stack,
        PRIORITY_IDLE,
        CreateFlags::WOUT_YIELD | CreateFlags::STACKTEST,
        idle_loop,
        core::ptr::null_mut(),
        "idle",
    )?;
    sched::run();
    log::info!("kernel: up, idle thread is {}", idle);
    Ok(idle)
}
