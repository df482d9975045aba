//! Per-thread flags
//!
//! Each thread carries a 16-bit flag word. Flags can be set from any
//! context, including interrupt handlers; a thread can block until any or
//! all of a mask are present. Waits consume the matched flags.

use crate::irq;
use crate::sched::tcb::WaitData;
use crate::sched::{self, Pid, ThreadState};

/// Flag reserved for the tasklet dispatcher thread.
pub const FLAG_TASKLET: u16 = 1 << 15;

/// Outcome of the non-suspending half of a flag wait.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// Flags matched and were consumed.
    Ready(u16),
    /// The calling thread is now flag-blocked.
    Blocked,
}

/// Set flags on a thread, waking it when its awaited mask is satisfied.
/// Safe to call from interrupt context. Unknown PIDs are ignored.
pub fn set(pid: Pid, mask: u16) {
    let woken_priority = sched::with_kernel(|k| {
        let Some(tcb) = k.table.get_mut(pid) else {
            return None;
        };
        tcb.flags |= mask;

        let awaited = match tcb.wait_data {
            WaitData::Flags(awaited) => awaited,
            _ => return None,
        };
        let satisfied = match tcb.state {
            ThreadState::FlagBlockedAny => tcb.flags & awaited != 0,
            ThreadState::FlagBlockedAll => tcb.flags & awaited == awaited,
            _ => false,
        };
        if !satisfied {
            return None;
        }

        tcb.wait_data = WaitData::None;
        let priority = tcb.priority;
        k.set_status(pid, ThreadState::Pending);
        Some(priority)
    });

    if let Some(priority) = woken_priority {
        sched::switch(priority);
    }
}

/// Clear flags on the calling thread, returning the ones that were set.
pub fn clear(mask: u16) -> u16 {
    sched::with_kernel(|k| {
        let me = k.active;
        let tcb = k.table.thread_mut(me);
        let cleared = tcb.flags & mask;
        tcb.flags &= !mask;
        cleared
    })
}

fn try_take(blocked_state: ThreadState, mask: u16) -> WaitOutcome {
    sched::with_kernel(|k| {
        let me = k.active;
        let tcb = k.table.thread_mut(me);
        let matched = tcb.flags & mask;
        let satisfied = match blocked_state {
            ThreadState::FlagBlockedAny => matched != 0,
            ThreadState::FlagBlockedAll => matched == mask,
            _ => unreachable!(),
        };
        if satisfied {
            tcb.flags &= !matched;
            return WaitOutcome::Ready(matched);
        }
        tcb.wait_data = WaitData::Flags(mask);
        k.set_status(me, blocked_state);
        WaitOutcome::Blocked
    })
}

fn wait(blocked_state: ThreadState, mask: u16) -> u16 {
    debug_assert!(!irq::is_in(), "cannot block on flags in interrupt context");
    loop {
        match try_take(blocked_state, mask) {
            WaitOutcome::Ready(matched) => return matched,
            WaitOutcome::Blocked => sched::yield_higher(),
        }
    }
}

/// Block until any flag of `mask` is set; returns and consumes the
/// matching flags.
pub fn wait_any(mask: u16) -> u16 {
    wait(ThreadState::FlagBlockedAny, mask)
}

/// Block until all flags of `mask` are set; returns and consumes them.
pub fn wait_all(mask: u16) -> u16 {
    wait(ThreadState::FlagBlockedAll, mask)
}
