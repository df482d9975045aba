//! Scheduler
//!
//! Fixed-priority, preemptive, single CPU. Priority 0 is the most urgent
//! and `SCHED_PRIO_LEVELS - 1` is the idle thread. Equal-priority threads
//! share the CPU cooperatively: the run queue of a level is rotated only
//! by an explicit yield.
//!
//! All scheduler state lives in one [`Kernel`] structure behind the
//! interrupt gate; [`with_kernel`] is the only way in, and none of the
//! public entry points here may be called from inside such a critical
//! section (they take the gate themselves).

pub(crate) mod runqueue;
pub(crate) mod tcb;

use crate::arch;
use crate::irq::{self, IrqLock};

use runqueue::RunQueues;
pub use tcb::{Pid, ThreadState};
use tcb::{Tcb, ThreadTable, WaitData};

/// Number of thread priority levels. The idle thread runs at
/// `SCHED_PRIO_LEVELS - 1`.
pub const SCHED_PRIO_LEVELS: usize = 16;

/// Maximum number of live threads.
pub const MAX_THREADS: usize = 32;

/// Global scheduler state.
pub(crate) struct Kernel {
    pub table: ThreadTable,
    pub rq: RunQueues,
    /// PID of the running thread, `Pid::UNDEF` before boot.
    pub active: Pid,
    /// Set when a more urgent thread became runnable; honored at the next
    /// return from interrupt or explicit yield point.
    pub context_switch_request: bool,
}

static KERNEL: IrqLock<Kernel> = IrqLock::new(Kernel::new());

/// Run `f` with exclusive access to the scheduler state.
pub(crate) fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    KERNEL.with(f)
}

impl Kernel {
    pub const fn new() -> Self {
        Kernel {
            table: ThreadTable::new(),
            rq: RunQueues::new(),
            active: Pid::UNDEF,
            context_switch_request: false,
        }
    }

    /// Disjoint borrows of the thread table and the run queues.
    pub fn split(&mut self) -> (&mut ThreadTable, &mut RunQueues) {
        (&mut self.table, &mut self.rq)
    }

    /// Priority of the running thread, or the worst possible value when
    /// nothing runs yet (so that anything outranks it).
    pub fn active_priority(&self) -> u8 {
        match self.table.get(self.active) {
            Some(tcb) => tcb.priority,
            None => u8::MAX,
        }
    }

    /// Transition a thread between states, maintaining run-queue
    /// membership and the priority bitmap.
    ///
    /// Never switches by itself; it only marks the context switch request
    /// when a thread that outranks the running one becomes runnable.
    pub fn set_status(&mut self, pid: Pid, status: ThreadState) {
        let was_runnable = self.table.thread(pid).state.is_on_runqueue();
        let is_runnable = status.is_on_runqueue();

        if was_runnable && !is_runnable {
            let (table, rq) = self.split();
            rq.remove(table, pid);
        } else if !was_runnable && is_runnable {
            let (table, rq) = self.split();
            rq.push_tail(table, pid);
            let priority = self.table.thread(pid).priority;
            if priority < self.active_priority() {
                self.context_switch_request = true;
            }
        }

        self.table.thread_mut(pid).state = status;
    }
}

/// Pick and dispatch the most urgent runnable thread.
///
/// The previous thread, if it was still `Running`, drops back to
/// `Pending` but keeps its position at the head of its priority level.
/// There must always be at least the idle thread to pick.
pub fn run() -> Pid {
    with_kernel(|k| {
        k.context_switch_request = false;

        if let Some(previous) = k.table.get_mut(k.active) {
            if previous.state == ThreadState::Running {
                previous.state = ThreadState::Pending;
            }
        }

        let priority = match k.rq.highest() {
            Some(priority) => priority,
            None => panic!("nothing to schedule (no idle thread?)"),
        };
        let pid = k
            .rq
            .head(priority)
            .unwrap_or_else(|| panic!("empty run queue marked in bitmap"));

        k.table.thread_mut(pid).state = ThreadState::Running;
        let previous = k.active;
        k.active = pid;
        if previous != pid {
            log::trace!("sched: {} -> {} (prio {})", previous, pid, priority);
        }
        pid
    })
}

/// Request a switch if a thread of `target_priority` outranks the running
/// thread. Outside interrupt context the switch happens immediately; an
/// ISR caller only marks the request, honored on interrupt return.
pub fn switch(target_priority: u8) {
    let preempt = with_kernel(|k| {
        if target_priority < k.active_priority() {
            k.context_switch_request = true;
            true
        } else {
            false
        }
    });

    if preempt && !irq::is_in() {
        yield_higher();
    }
}

/// Hand the CPU to the most urgent runnable thread without giving up the
/// caller's head position within its own priority level.
pub fn yield_higher() {
    debug_assert!(!irq::is_in(), "cannot yield from interrupt context");
    arch::trigger_context_switch();
}

/// Yield to the next thread of the same priority: rotates the caller's
/// run queue before picking, so the caller goes to the back of its level.
pub fn yield_now() {
    with_kernel(|k| {
        let active = k.active;
        if let Some(tcb) = k.table.get(active) {
            if tcb.state.is_on_runqueue() {
                let priority = tcb.priority;
                let (table, rq) = k.split();
                rq.advance(table, priority);
            }
        }
    });
    yield_higher();
}

/// Whether a context switch request is pending. Checked by interrupt
/// return paths.
pub fn context_switch_requested() -> bool {
    with_kernel(|k| k.context_switch_request)
}

/// PID of the running thread, `Pid::UNDEF` before boot.
pub fn active_pid() -> Pid {
    with_kernel(|k| k.active)
}

/// Default TCB for a fresh thread; the PID is assigned by the table.
pub(crate) fn blank_tcb(
    priority: u8,
    name: &'static str,
    stack: *mut u8,
    stack_size: usize,
    sp: *mut u8,
) -> Tcb {
    Tcb {
        pid: Pid::UNDEF,
        state: ThreadState::Stopped,
        priority,
        name,
        sp,
        stack,
        stack_size,
        flags: 0,
        rq_next: None,
        rq_prev: None,
        wait_next: None,
        wq_next: tcb::WqLink::NotQueued,
        wait_data: WaitData::None,
        msg_waiters: crate::list::ThreadList::new(),
        msg_queue: None,
    }
}
