//! Tasklets
//!
//! Deferred work items for offloading interrupt handlers: an ISR calls
//! [`Tasklet::schedule`] and a dedicated dispatcher thread at the highest
//! priority runs the task function as soon as the scheduler allows.
//! Scheduling an already-pending tasklet is a no-op, so a burst of
//! interrupts results in a single run.
//!
//! Tasklets run in thread context, not ISR context, but at priority 0;
//! synchronization with the rest of the system is the task's business.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::cib::Cib;
use crate::error::KernelResult;
use crate::irq::IrqLock;
use crate::sched::Pid;
use crate::thread::{self, flags, CreateFlags};

/// Queue depth of the tasklet FIFO. Bounded by the number of distinct
/// tasklets, since a pending tasklet is never enqueued twice.
const TASKLET_QUEUE: usize = 16;

/// A deferred work item. Create as a `static`.
pub struct Tasklet {
    task: fn(arg: usize),
    arg: usize,
    pending: AtomicBool,
}

impl Tasklet {
    pub const fn new(task: fn(arg: usize), arg: usize) -> Self {
        Tasklet {
            task,
            arg,
            pending: AtomicBool::new(false),
        }
    }

    /// Invoke the task function. Normally done by the dispatcher thread.
    pub fn run(&self) {
        (self.task)(self.arg)
    }

    /// Queue this tasklet for execution by the dispatcher thread. Safe to
    /// call from interrupt context; idempotent while already pending.
    pub fn schedule(&'static self) {
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let dispatcher = QUEUE.with(|queue| {
            let index = match queue.cib.put() {
                Some(index) => index,
                None => panic!("tasklet queue overflow"),
            };
            queue.slots[index] = Some(self);
            queue.dispatcher
        });
        if dispatcher != Pid::UNDEF {
            flags::set(dispatcher, flags::FLAG_TASKLET);
        }
    }
}

struct TaskletQueue {
    cib: Cib,
    slots: [Option<&'static Tasklet>; TASKLET_QUEUE],
    dispatcher: Pid,
}

static QUEUE: IrqLock<TaskletQueue> = IrqLock::new(TaskletQueue {
    cib: Cib::new(TASKLET_QUEUE as u32),
    slots: [None; TASKLET_QUEUE],
    dispatcher: Pid::UNDEF,
});

/// Pop the oldest scheduled tasklet, clearing its pending mark so it can
/// be scheduled again (even from within its own task function).
///
/// Exposed for tests; the dispatcher thread is the ordinary consumer.
pub fn pop() -> Option<&'static Tasklet> {
    QUEUE.with(|queue| {
        let index = queue.cib.get()?;
        let tasklet = queue.slots[index].take();
        if let Some(tasklet) = tasklet {
            tasklet.pending.store(false, Ordering::Release);
        }
        tasklet
    })
}

/// Drop all scheduled tasklets. Exposed for tests only.
pub fn reset() {
    QUEUE.with(|queue| {
        while let Some(index) = queue.cib.get() {
            if let Some(tasklet) = queue.slots[index].take() {
                tasklet.pending.store(false, Ordering::Release);
            }
        }
        queue.dispatcher = Pid::UNDEF;
    });
}

fn dispatcher_loop(_arg: *mut ()) {
    loop {
        flags::wait_any(flags::FLAG_TASKLET);
        while let Some(tasklet) = pop() {
            tasklet.run();
        }
    }
}

/// Create the tasklet dispatcher thread at the highest priority.
///
/// Called once during system bring-up, before anything schedules a
/// tasklet that needs dispatching.
pub fn init(stack: &'static mut [u8]) -> KernelResult<Pid> {
    let pid = thread::create(
        stack,
        0,
        CreateFlags::WOUT_YIELD,
        dispatcher_loop,
        core::ptr::null_mut(),
        "tasklet",
    )?;
    QUEUE.with(|queue| queue.dispatcher = pid);
    Ok(pid)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use core::sync::atomic::AtomicUsize;

    use super::*;
    use crate::sched::{self, ThreadState};
    use crate::testing;

    static RUNS: AtomicUsize = AtomicUsize::new(0);

    fn count_run(arg: usize) {
        RUNS.fetch_add(arg, Ordering::SeqCst);
    }

    #[test]
    fn schedule_is_idempotent_while_pending() {
        let _t = testing::lock();
        static T: Tasklet = Tasklet::new(count_run, 1);

        T.schedule();
        T.schedule();
        T.schedule();

        assert!(pop().is_some());
        assert!(pop().is_none());
    }

    #[test]
    fn pop_returns_fifo_order() {
        let _t = testing::lock();
        static A: Tasklet = Tasklet::new(count_run, 10);
        static B: Tasklet = Tasklet::new(count_run, 20);

        A.schedule();
        B.schedule();

        assert_eq!(pop().map(|t| t.arg), Some(10));
        assert_eq!(pop().map(|t| t.arg), Some(20));
        assert_eq!(pop().map(|t| t.arg), None);
    }

    #[test]
    fn popped_tasklet_can_be_rescheduled() {
        let _t = testing::lock();
        static T: Tasklet = Tasklet::new(count_run, 1);

        T.schedule();
        let popped = pop().unwrap();
        popped.run();

        T.schedule();
        assert!(pop().is_some());
    }

    #[test]
    fn schedule_wakes_the_dispatcher() {
        let _t = testing::lock();
        testing::create_thread(crate::thread::PRIORITY_IDLE, "idle");
        let dispatcher = init(testing::stack(512)).unwrap();
        let worker = testing::create_thread(5, "worker");

        // The dispatcher parks on its flag.
        testing::set_active(dispatcher);
        sched::with_kernel(|k| {
            k.table.thread_mut(dispatcher).wait_data =
                crate::sched::tcb::WaitData::Flags(flags::FLAG_TASKLET);
            k.set_status(dispatcher, ThreadState::FlagBlockedAny);
        });
        assert_eq!(sched::run(), worker);

        // Scheduling from an ISR wakes it; the switch request is honored
        // on interrupt return and the dispatcher preempts the worker.
        static T: Tasklet = Tasklet::new(count_run, 1);
        testing::in_isr(|| T.schedule());
        assert_eq!(crate::thread::getpid(), dispatcher);
        assert_eq!(pop().map(|t| t.arg), Some(1));
    }
}
