//! Mutex
//!
//! A blocking mutual exclusion lock with a priority-sorted waiter list.
//! Unlocking with waiters present does not clear the lock bit: the lock is
//! handed directly to the most urgent waiter, so the releaser can never
//! race it to re-acquire. The woken waiter preempts the releaser
//! immediately when it is more urgent; an unlock from interrupt context
//! only marks the switch request.

use crate::irq::{self, IrqLock};
use crate::list::ThreadList;
use crate::sched::{self, Kernel, ThreadState};

struct MutexState {
    locked: bool,
    waiters: ThreadList,
}

/// Mutual exclusion lock. The default value is unlocked with no waiters.
pub struct Mutex {
    state: IrqLock<MutexState>,
}

/// Outcome of the non-suspending half of `lock`.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LockOutcome {
    /// The lock was free and is now held by the caller.
    Acquired,
    /// The caller was enqueued and marked `MutexBlocked`.
    Blocked,
}

impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            state: IrqLock::new(MutexState {
                locked: false,
                waiters: ThreadList::new(),
            }),
        }
    }

    /// Take the lock bit or enqueue the calling thread, without
    /// suspending. Runs under a single critical section so a concurrent
    /// unlock from an ISR cannot slip between the check and the enqueue.
    pub(crate) fn lock_or_enqueue(&self) -> LockOutcome {
        sched::with_kernel(|k| {
            self.state.with(|state| {
                if !state.locked {
                    state.locked = true;
                    return LockOutcome::Acquired;
                }
                let me = k.active;
                state.waiters.insert_by_prio(&mut k.table, me);
                k.set_status(me, ThreadState::MutexBlocked);
                LockOutcome::Blocked
            })
        })
    }

    /// Lock, blocking until the mutex is available.
    ///
    /// On return the calling thread holds the lock, either because it was
    /// free or because an unlock handed it over directly.
    pub fn lock(&self) {
        debug_assert!(!irq::is_in(), "cannot block on a mutex in interrupt context");
        match self.lock_or_enqueue() {
            LockOutcome::Acquired => {}
            LockOutcome::Blocked => {
                // Once we run again the unlock path has transferred the
                // lock to us; there is nothing to re-check.
                sched::yield_higher();
            }
        }
    }

    /// Try to lock without blocking. Returns whether the lock was taken.
    pub fn try_lock(&self) -> bool {
        self.state.with(|state| {
            if state.locked {
                false
            } else {
                state.locked = true;
                true
            }
        })
    }

    /// Whether the mutex is currently locked.
    pub fn is_locked(&self) -> bool {
        self.state.with(|state| state.locked)
    }

    /// Unlock bookkeeping shared by [`Mutex::unlock`] and the condition
    /// variable's atomic wait entry. Returns the priority of the waiter
    /// the lock was handed to, if any.
    pub(crate) fn unlock_with(&self, k: &mut Kernel) -> Option<u8> {
        self.state.with(|state| {
            debug_assert!(state.locked, "unlock of an unlocked mutex");
            match state.waiters.pop_head(&mut k.table) {
                Some(next) => {
                    // Direct hand-off: the lock bit stays set for `next`.
                    let priority = k.table.thread(next).priority;
                    k.set_status(next, ThreadState::Pending);
                    Some(priority)
                }
                None => {
                    state.locked = false;
                    None
                }
            }
        })
    }

    /// Unlock, handing the lock to the most urgent waiter if any.
    pub fn unlock(&self) {
        let handed_to = sched::with_kernel(|k| self.unlock_with(k));
        if let Some(priority) = handed_to {
            sched::switch(priority);
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
