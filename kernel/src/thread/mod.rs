//! Threading API
//!
//! Threads are created at boot against caller-provided static stacks; the
//! kernel never allocates. The priority is fixed for the thread's
//! lifetime: lower values are more urgent, and
//! [`PRIORITY_IDLE`](crate::thread::PRIORITY_IDLE) is reserved for the
//! idle thread. Assigning the same priority to several threads makes them
//! share the CPU cooperatively.

pub mod flags;

use bitflags::bitflags;

use crate::arch;
use crate::error::{KernelError, KernelResult};
use crate::irq;
use crate::sched::{self, Pid, ThreadState, MAX_THREADS, SCHED_PRIO_LEVELS};

pub use crate::sched::tcb::ThreadFn;

/// Least urgent usable priority.
pub const PRIORITY_MIN: u8 = (SCHED_PRIO_LEVELS - 1) as u8;
/// Priority of the idle thread.
pub const PRIORITY_IDLE: u8 = PRIORITY_MIN;
/// Suggested priority for an application's main thread.
pub const PRIORITY_MAIN: u8 = PRIORITY_MIN - (SCHED_PRIO_LEVELS / 2) as u8;

/// Byte written over a stack at creation when stack usage measurement is
/// requested.
const STACK_CANARY: u8 = 0x5a;

bitflags! {
    /// Flags controlling a thread's initial state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CreateFlags: u32 {
        /// Create the thread sleeping; it must be woken with [`wakeup`].
        const SLEEPING = 1 << 0;
        /// Do not yield towards the new thread even if it is more urgent;
        /// any later context switch may still start it.
        const WOUT_YIELD = 1 << 2;
        /// Paint the stack so its usage can be measured later.
        const STACKTEST = 1 << 3;
    }
}

/// Snapshot of a thread's identity, taken under the interrupt gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThreadInfo {
    pub pid: Pid,
    pub name: &'static str,
    pub priority: u8,
    pub state: ThreadState,
}

/// Create a new thread.
///
/// The stack storage is handed over for the lifetime of the process. The
/// new thread starts `Pending` (or `Sleeping` with
/// [`CreateFlags::SLEEPING`]) and, unless [`CreateFlags::WOUT_YIELD`] is
/// given, immediately preempts the caller when it is more urgent.
///
/// # Errors
///
/// - [`KernelError::InvalidPriority`] if `priority` is out of range.
/// - [`KernelError::ThreadTableFull`] if all PID slots are taken.
pub fn create(
    stack: &'static mut [u8],
    priority: u8,
    flags: CreateFlags,
    entry: ThreadFn,
    arg: *mut (),
    name: &'static str,
) -> KernelResult<Pid> {
    if priority as usize >= SCHED_PRIO_LEVELS {
        return Err(KernelError::InvalidPriority { priority });
    }

    if flags.contains(CreateFlags::STACKTEST) {
        stack.fill(STACK_CANARY);
    }

    let stack_size = stack.len();
    let stack_base = stack.as_mut_ptr();
    let sp = arch::init_stack(entry, arg, stack_base, stack_size);

    let pid = sched::with_kernel(|k| {
        let tcb = sched::blank_tcb(priority, name, stack_base, stack_size, sp);
        let pid = k.table.insert(tcb)?;
        if flags.contains(CreateFlags::SLEEPING) {
            k.set_status(pid, ThreadState::Sleeping);
        } else {
            k.set_status(pid, ThreadState::Pending);
        }
        Ok(pid)
    })?;

    log::debug!("thread: created {} ({:?}, prio {})", pid, name, priority);

    if !flags.intersects(CreateFlags::SLEEPING | CreateFlags::WOUT_YIELD) && !irq::is_in() {
        sched::switch(priority);
    }
    Ok(pid)
}

/// PID of the calling thread (`Pid::UNDEF` before the first dispatch).
pub fn getpid() -> Pid {
    sched::active_pid()
}

/// Snapshot of a thread, or `None` if the PID names no live thread.
pub fn get(pid: Pid) -> Option<ThreadInfo> {
    sched::with_kernel(|k| {
        k.table.get(pid).map(|tcb| ThreadInfo {
            pid: tcb.pid,
            name: tcb.name,
            priority: tcb.priority,
            state: tcb.state,
        })
    })
}

/// A thread's current state, or `None` if the PID names no live thread.
pub fn get_status(pid: Pid) -> Option<ThreadState> {
    sched::with_kernel(|k| k.table.get(pid).map(|tcb| tcb.state))
}

/// A thread's name, or `None` if the PID names no live thread.
pub fn get_name(pid: Pid) -> Option<&'static str> {
    sched::with_kernel(|k| k.table.get(pid).map(|tcb| tcb.name))
}

/// Put the calling thread to sleep until [`wakeup`] is called on it.
pub fn sleep() {
    debug_assert!(!irq::is_in(), "cannot sleep in interrupt context");
    sched::with_kernel(|k| {
        let me = k.active;
        k.set_status(me, ThreadState::Sleeping);
    });
    sched::yield_higher();
}

/// Wake a sleeping thread.
///
/// # Errors
///
/// - [`KernelError::NoSuchThread`] if the PID names no live thread.
/// - [`KernelError::ThreadNotSleeping`] if the thread is not sleeping.
pub fn wakeup(pid: Pid) -> KernelResult<()> {
    let priority = sched::with_kernel(|k| {
        let tcb = k.table.get(pid).ok_or(KernelError::NoSuchThread { pid })?;
        if tcb.state != ThreadState::Sleeping {
            return Err(KernelError::ThreadNotSleeping { pid });
        }
        let priority = tcb.priority;
        k.set_status(pid, ThreadState::Pending);
        Ok(priority)
    })?;
    sched::switch(priority);
    Ok(())
}

/// Yield to the next thread of the same or higher priority; the caller
/// moves to the back of its priority level.
pub fn yield_now() {
    sched::yield_now();
}

/// Yield only if a more urgent thread is runnable; the caller keeps its
/// head position within its own priority level.
pub fn yield_higher() {
    sched::yield_higher();
}

/// Terminate the calling thread and free its PID slot.
///
/// The thread must not hold kernel objects (a locked mutex, a bus
/// attachment) when it exits.
pub fn exit() {
    debug_assert!(!irq::is_in());
    sched::with_kernel(|k| {
        let me = k.active;
        k.set_status(me, ThreadState::Stopped);
        k.table.free(me);
        k.active = Pid::UNDEF;
    });
    sched::run();
}

/// Number of live threads.
pub fn count() -> usize {
    sched::with_kernel(|k| k.table.count())
}

/// Bytes of a thread's stack never touched since creation.
///
/// Meaningful only for threads created with [`CreateFlags::STACKTEST`].
pub fn measure_stack_free(pid: Pid) -> KernelResult<usize> {
    sched::with_kernel(|k| {
        let tcb = k.table.get(pid).ok_or(KernelError::NoSuchThread { pid })?;
        let mut free = 0;
        while free < tcb.stack_size {
            // SAFETY: `stack` and `stack_size` describe the static stack
            // slice handed over at creation; the offset stays in bounds.
            let byte = unsafe { tcb.stack.add(free).read() };
            if byte != STACK_CANARY {
                break;
            }
            free += 1;
        }
        Ok(free)
    })
}

/// Upper bound on live threads, re-exported for applications sizing
/// tables by PID.
pub const fn max_threads() -> usize {
    MAX_THREADS
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::testing;

    fn noop(_arg: *mut ()) {}

    #[test]
    fn create_rejects_bad_priority() {
        let _t = testing::lock();
        let result = create(
            testing::stack(256),
            SCHED_PRIO_LEVELS as u8,
            CreateFlags::WOUT_YIELD,
            noop,
            core::ptr::null_mut(),
            "bad",
        );
        assert_eq!(
            result,
            Err(KernelError::InvalidPriority {
                priority: SCHED_PRIO_LEVELS as u8
            })
        );
    }

    #[test]
    fn create_reports_exhaustion() {
        let _t = testing::lock();
        for _ in 0..MAX_THREADS {
            create(
                testing::stack(128),
                PRIORITY_MAIN,
                CreateFlags::WOUT_YIELD,
                noop,
                core::ptr::null_mut(),
                "filler",
            )
            .unwrap();
        }
        let result = create(
            testing::stack(128),
            PRIORITY_MAIN,
            CreateFlags::WOUT_YIELD,
            noop,
            core::ptr::null_mut(),
            "straw",
        );
        assert_eq!(result, Err(KernelError::ThreadTableFull));
    }

    #[test]
    fn created_thread_is_pending_and_named() {
        let _t = testing::lock();
        let pid = create(
            testing::stack(256),
            3,
            CreateFlags::WOUT_YIELD,
            noop,
            core::ptr::null_mut(),
            "worker",
        )
        .unwrap();

        assert_eq!(get_status(pid), Some(ThreadState::Pending));
        assert_eq!(get_name(pid), Some("worker"));
        let info = get(pid).unwrap();
        assert_eq!(info.priority, 3);
    }

    #[test]
    fn sleeping_flag_skips_the_runqueue() {
        let _t = testing::lock();
        let pid = create(
            testing::stack(256),
            3,
            CreateFlags::SLEEPING | CreateFlags::WOUT_YIELD,
            noop,
            core::ptr::null_mut(),
            "dozy",
        )
        .unwrap();
        assert_eq!(get_status(pid), Some(ThreadState::Sleeping));

        wakeup(pid).unwrap();
        assert_eq!(get_status(pid), Some(ThreadState::Pending));
    }

    #[test]
    fn wakeup_rejects_non_sleepers() {
        let _t = testing::lock();
        let pid = testing::create_thread(4, "awake");
        assert_eq!(wakeup(pid), Err(KernelError::ThreadNotSleeping { pid }));
        assert_eq!(
            wakeup(Pid(999)),
            Err(KernelError::NoSuchThread { pid: Pid(999) })
        );
    }

    #[test]
    fn sleep_then_wakeup_roundtrip() {
        let _t = testing::lock();
        testing::create_thread(PRIORITY_IDLE, "idle");
        let pid = testing::create_thread(4, "napper");
        assert_eq!(sched::run(), pid);

        sleep();
        assert_eq!(get_status(pid), Some(ThreadState::Sleeping));

        wakeup(pid).unwrap();
        assert_eq!(get_status(pid), Some(ThreadState::Running));
        assert_eq!(getpid(), pid);
    }

    #[test]
    fn exit_frees_the_pid() {
        let _t = testing::lock();
        testing::create_thread(PRIORITY_IDLE, "idle");
        let pid = testing::create_thread(2, "mayfly");
        assert_eq!(sched::run(), pid);

        exit();
        assert_eq!(get_status(pid), None);
        assert_eq!(get(pid), None);
    }

    #[test]
    fn stacktest_measures_untouched_stack() {
        let _t = testing::lock();
        let pid = create(
            testing::stack(512),
            5,
            CreateFlags::STACKTEST | CreateFlags::WOUT_YIELD,
            noop,
            core::ptr::null_mut(),
            "painted",
        )
        .unwrap();
        assert_eq!(measure_stack_free(pid).unwrap(), 512);
    }

    #[test]
    fn create_preempts_less_urgent_caller() {
        let _t = testing::lock();
        let low = testing::create_thread(9, "low");
        assert_eq!(sched::run(), low);

        let high = create(
            testing::stack(256),
            1,
            CreateFlags::empty(),
            noop,
            core::ptr::null_mut(),
            "high",
        )
        .unwrap();
        // The creation yielded towards the more urgent thread.
        assert_eq!(getpid(), high);
        assert_eq!(get_status(low), Some(ThreadState::Pending));
    }
}
