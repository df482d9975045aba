//! Run queues
//!
//! One circular doubly linked list of runnable threads per priority level,
//! linked through the `rq_next`/`rq_prev` fields of the TCBs, plus a
//! bitmap word marking the non-empty levels. The scheduler's pick is the
//! head of the list at `bitmap.trailing_zeros()`.
//!
//! Invariant: bit `p` of the bitmap is set exactly when the list at
//! priority `p` is non-empty.

use crate::sched::tcb::{Pid, ThreadTable};
use crate::sched::SCHED_PRIO_LEVELS;

pub(crate) struct RunQueues {
    bitmap: u32,
    heads: [Option<Pid>; SCHED_PRIO_LEVELS],
}

impl RunQueues {
    pub const fn new() -> Self {
        RunQueues {
            bitmap: 0,
            heads: [None; SCHED_PRIO_LEVELS],
        }
    }

    /// Highest priority (lowest value) with a runnable thread.
    #[inline]
    pub fn highest(&self) -> Option<u8> {
        if self.bitmap == 0 {
            None
        } else {
            Some(self.bitmap.trailing_zeros() as u8)
        }
    }

    #[inline]
    pub fn head(&self, priority: u8) -> Option<Pid> {
        self.heads[priority as usize]
    }

    pub fn bitmap(&self) -> u32 {
        self.bitmap
    }

    /// Append a thread at the tail of its priority's queue (FIFO).
    pub fn push_tail(&mut self, table: &mut ThreadTable, pid: Pid) {
        let priority = table.thread(pid).priority as usize;
        debug_assert!(table.thread(pid).rq_next.is_none());

        match self.heads[priority] {
            None => {
                let tcb = table.thread_mut(pid);
                tcb.rq_next = Some(pid);
                tcb.rq_prev = Some(pid);
                self.heads[priority] = Some(pid);
            }
            Some(head) => {
                // The tail position is "just before the head" in a circle.
                let tail = table.thread(head).rq_prev.unwrap_or(head);
                table.thread_mut(pid).rq_next = Some(head);
                table.thread_mut(pid).rq_prev = Some(tail);
                table.thread_mut(tail).rq_next = Some(pid);
                table.thread_mut(head).rq_prev = Some(pid);
            }
        }
        self.bitmap |= 1 << priority;
    }

    /// Unlink a thread from its priority's queue.
    ///
    /// # Panics
    ///
    /// Panics if the thread is not linked: removing a thread that is not
    /// runnable is a kernel bug, not a recoverable condition.
    pub fn remove(&mut self, table: &mut ThreadTable, pid: Pid) {
        let priority = table.thread(pid).priority as usize;
        let (next, prev) = {
            let tcb = table.thread(pid);
            match (tcb.rq_next, tcb.rq_prev) {
                (Some(next), Some(prev)) => (next, prev),
                _ => panic!("thread {} is not on a run queue", pid),
            }
        };

        if next == pid {
            // Sole entry.
            self.heads[priority] = None;
            self.bitmap &= !(1 << priority);
        } else {
            table.thread_mut(prev).rq_next = Some(next);
            table.thread_mut(next).rq_prev = Some(prev);
            if self.heads[priority] == Some(pid) {
                self.heads[priority] = Some(next);
            }
        }

        let tcb = table.thread_mut(pid);
        tcb.rq_next = None;
        tcb.rq_prev = None;
    }

    /// Rotate a priority's queue: the second entry becomes the head.
    ///
    /// Used by the explicit yield so equal-priority threads round-robin.
    pub fn advance(&mut self, table: &ThreadTable, priority: u8) {
        if let Some(head) = self.heads[priority as usize] {
            self.heads[priority as usize] = table.thread(head).rq_next;
        }
    }
}
