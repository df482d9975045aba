//! Condition variable
//!
//! Mesa semantics: a signal marks the most urgent waiter runnable but does
//! not transfer the CPU to it, so the woken thread must re-check its
//! predicate. The standard usage pattern is
//!
//! ```ignore
//! lock.lock();
//! while !condition {
//!     cond.wait(&lock);
//! }
//! lock.unlock();
//! ```
//!
//! Signalling is legal from interrupt context, but if the condition itself
//! is set by an ISR a [`WaitQueue`](crate::sync::WaitQueue) avoids the
//! check-then-sleep race that a condition variable cannot.

use crate::irq::{self, IrqLock};
use crate::list::ThreadList;
use crate::sched::{self, ThreadState};
use crate::sync::Mutex;

/// Condition variable. The associated mutex is supplied per call.
pub struct Cond {
    queue: IrqLock<ThreadList>,
}

impl Cond {
    pub const fn new() -> Self {
        Cond {
            queue: IrqLock::new(ThreadList::new()),
        }
    }

    /// Park the calling thread on the condition without suspending yet:
    /// atomically releases `mutex`, enqueues the caller by priority, and
    /// marks it `CondBlocked`. The caller must then yield.
    pub(crate) fn enqueue_wait(&self, mutex: &Mutex) {
        sched::with_kernel(|k| {
            let me = k.active;
            // All of this happens under one interrupt-masked span: a
            // signal arriving from an ISR right after the unlock finds
            // the thread already on the queue and simply marks it
            // Pending, which the yield below then honors.
            mutex.unlock_with(k);
            k.set_status(me, ThreadState::CondBlocked);
            self.queue.with(|queue| queue.insert_by_prio(&mut k.table, me));
        });
    }

    /// Atomically release `mutex` and wait for a signal; the mutex is
    /// re-acquired before returning.
    pub fn wait(&self, mutex: &Mutex) {
        debug_assert!(!irq::is_in(), "cannot wait in interrupt context");
        self.enqueue_wait(mutex);
        sched::yield_higher();
        // Signalled; contend for the mutex again before returning.
        mutex.lock();
    }

    fn signal_common(&self, broadcast: bool) {
        let mut best: Option<u8> = None;
        sched::with_kernel(|k| {
            self.queue.with(|queue| {
                while let Some(pid) = queue.pop_head(&mut k.table) {
                    // The queue is priority-sorted, so the first wake is
                    // the most urgent one.
                    let priority = k.table.thread(pid).priority;
                    k.set_status(pid, ThreadState::Pending);
                    if best.is_none() {
                        best = Some(priority);
                    }
                    if !broadcast {
                        break;
                    }
                }
            });
        });
        if let Some(priority) = best {
            sched::switch(priority);
        }
    }

    /// Wake the most urgent waiter, if any. An empty signal is a no-op.
    pub fn signal(&self) {
        self.signal_common(false);
    }

    /// Wake every waiter. The scheduler pick still ensures the most
    /// urgent one runs first.
    pub fn broadcast(&self) {
        self.signal_common(true);
    }
}

impl Default for Cond {
    fn default() -> Self {
        Self::new()
    }
}
