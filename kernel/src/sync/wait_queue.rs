//! Wait queue
//!
//! Condition signalling that is safe against interrupt handlers. Unlike a
//! condition variable, the waiting side re-evaluates its predicate *after*
//! enqueuing itself, so a wake fired between the predicate check and the
//! enqueue cannot be lost:
//!
//! ```ignore
//! static WQ: WaitQueue = WaitQueue::new();
//!
//! fn measurement_irq() {
//!     // store the measurement ...
//!     WQ.wake();
//! }
//!
//! fn wait_for_threshold() {
//!     WQ.wait(|| measurement() >= THRESHOLD);
//! }
//! ```
//!
//! While evaluating the predicate a thread may block on something else
//! entirely (say a mutex inside the expression). The TCB therefore keeps a
//! token naming the queue it actually sleeps on; `wake` only makes a
//! thread runnable when that token matches, but always unlinks it so the
//! next predicate evaluation starts from a clean slate.

use crate::irq::{self, IrqLock};
use crate::sched::tcb::{WaitData, WqLink};
use crate::sched::{self, Kernel, Pid, ThreadState};

struct WqList {
    head: WqLink,
}

/// Wait queue for predicate-based blocking, wakeable from ISRs.
pub struct WaitQueue {
    list: IrqLock<WqList>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        WaitQueue {
            list: IrqLock::new(WqList { head: WqLink::Tail }),
        }
    }

    /// Identity token stored in sleeping TCBs. The queue must not move
    /// while threads wait on it, which its users guarantee by keeping it
    /// in a `static` or otherwise pinned location.
    fn token(&self) -> usize {
        self as *const WaitQueue as usize
    }

    /// Link `pid` into the priority-sorted list if it is not linked yet.
    fn enqueue(&self, k: &mut Kernel, pid: Pid) {
        self.list.with(|list| {
            if k.table.thread(pid).is_in_wq() {
                return;
            }
            let priority = k.table.thread(pid).priority;

            // Find the insertion point: after the run of entries with
            // better or equal priority.
            let mut prev: Option<Pid> = None;
            let mut cursor = list.head;
            while let WqLink::Next(curr) = cursor {
                if k.table.thread(curr).priority > priority {
                    break;
                }
                prev = Some(curr);
                cursor = k.table.thread(curr).wq_next;
            }

            match prev {
                None => {
                    k.table.thread_mut(pid).wq_next = list.head;
                    list.head = WqLink::Next(pid);
                }
                Some(prev) => {
                    let after = k.table.thread(prev).wq_next;
                    k.table.thread_mut(pid).wq_next = after;
                    k.table.thread_mut(prev).wq_next = WqLink::Next(pid);
                }
            }
        });
    }

    /// Unlink `pid` if present, clearing its linkage.
    fn dequeue(&self, k: &mut Kernel, pid: Pid) {
        self.list.with(|list| {
            if !k.table.thread(pid).is_in_wq() {
                return;
            }
            let mut prev: Option<Pid> = None;
            let mut cursor = list.head;
            while let WqLink::Next(curr) = cursor {
                let next = k.table.thread(curr).wq_next;
                if curr == pid {
                    match prev {
                        None => list.head = next,
                        Some(prev) => k.table.thread_mut(prev).wq_next = next,
                    }
                    k.table.thread_mut(pid).wq_next = WqLink::NotQueued;
                    return;
                }
                prev = Some(curr);
                cursor = next;
            }
            // Linked according to its TCB but not found here: it waits on
            // a different queue, which is fine.
        });
    }

    /// Go to sleep if nothing woke us since the last predicate check,
    /// then make sure we are enqueued for the next check.
    fn maybe_yield_and_enqueue(&self, pid: Pid) {
        let parked = sched::with_kernel(|k| {
            if !k.table.thread(pid).is_in_wq() {
                // A wake removed us while the predicate was being
                // evaluated. Skip the sleep and re-check instead.
                self.enqueue(k, pid);
                return false;
            }
            k.table.thread_mut(pid).wait_data = WaitData::WaitQueue(self.token());
            k.set_status(pid, ThreadState::WqBlocked);
            true
        });

        if parked {
            sched::yield_higher();
            sched::with_kernel(|k| self.enqueue(k, pid));
        }
    }

    /// Block until `predicate` returns true.
    ///
    /// The predicate is evaluated with interrupts enabled and may itself
    /// block (it may take a mutex, for instance), but must not wait on
    /// another wait queue: a thread owns a single wait-queue link. It is
    /// re-evaluated after every enqueue, which is what makes a wake from
    /// an ISR impossible to miss.
    pub fn wait<F: FnMut() -> bool>(&self, mut predicate: F) {
        debug_assert!(!irq::is_in(), "cannot wait in interrupt context");

        if predicate() {
            return;
        }

        let me = sched::active_pid();
        sched::with_kernel(|k| self.enqueue(k, me));
        while !predicate() {
            self.maybe_yield_and_enqueue(me);
        }
        sched::with_kernel(|k| {
            self.dequeue(k, me);
            let tcb = k.table.thread_mut(me);
            if tcb.wait_data == WaitData::WaitQueue(self.token()) {
                tcb.wait_data = WaitData::None;
            }
        });
    }

    fn wake_common(&self, all: bool) {
        let mut best: Option<u8> = None;
        sched::with_kernel(|k| {
            self.list.with(|list| {
                while let WqLink::Next(pid) = list.head {
                    // Unlink unconditionally so the thread's next
                    // predicate check starts with a fresh enqueue.
                    list.head = k.table.thread(pid).wq_next;
                    k.table.thread_mut(pid).wq_next = WqLink::NotQueued;

                    let tcb = k.table.thread(pid);
                    let sleeps_here = tcb.state == ThreadState::WqBlocked
                        && tcb.wait_data == WaitData::WaitQueue(self.token());
                    if sleeps_here {
                        let priority = tcb.priority;
                        k.table.thread_mut(pid).wait_data = WaitData::None;
                        k.set_status(pid, ThreadState::Pending);
                        if best.is_none() {
                            best = Some(priority);
                        }
                        if !all {
                            break;
                        }
                    }
                    // A thread that went to sleep elsewhere mid-predicate
                    // is left alone; it re-checks when it resumes.
                }
            });
        });
        if let Some(priority) = best {
            sched::switch(priority);
        }
    }

    /// Wake every thread sleeping on this queue.
    pub fn wake(&self) {
        self.wake_common(true);
    }

    /// Wake the most urgent thread sleeping on this queue.
    pub fn wake_one(&self) {
        self.wake_common(false);
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
