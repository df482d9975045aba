//! Thread control block
//!
//! The TCB is the hub every other kernel object hangs off: run queue and
//! wait-list linkage, the blocking reason, and the optional per-thread
//! message queue all live here. Threads are kept in a fixed table indexed
//! by PID; list linkage is expressed as PID links into that table, so no
//! node is ever allocated.

use core::fmt;

use crate::cib::Cib;
use crate::error::{KernelError, KernelResult};
use crate::ipc::Msg;
use crate::list::ThreadList;
use crate::sched::MAX_THREADS;

/// Unique thread identifier, stable for the thread's lifetime.
///
/// Valid thread PIDs are `1..=MAX_THREADS`; slot `pid - 1` of the thread
/// table holds the TCB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pid(pub u16);

impl Pid {
    /// "No thread": the active PID before boot, and the default sender.
    pub const UNDEF: Pid = Pid(0);
    /// Sender PID stamped on messages sent from interrupt context.
    pub const ISR: Pid = Pid(u16::MAX);

    /// Table slot backing this PID.
    #[inline]
    pub(crate) fn index(self) -> usize {
        debug_assert!(self != Pid::UNDEF && self != Pid::ISR);
        (self.0 - 1) as usize
    }

    pub(crate) fn from_index(index: usize) -> Pid {
        Pid(index as u16 + 1)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread states.
///
/// `Running` and `Pending` are the "on run queue" states; everything else
/// is off the run queues. All transitions go through the scheduler's
/// `set_status` with interrupts masked.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Has terminated.
    Stopped,
    /// Has terminated but keeps its TCB for inspection.
    Zombie,
    /// Sleeping until woken externally.
    Sleeping,
    /// Waiting for a locked mutex.
    MutexBlocked,
    /// Waiting for a message.
    ReceiveBlocked,
    /// Waiting for a message to be delivered.
    SendBlocked,
    /// Waiting for a message response.
    ReplyBlocked,
    /// Waiting for any flag in the wait mask.
    FlagBlockedAny,
    /// Waiting for all flags in the wait mask.
    FlagBlockedAll,
    /// Waiting for mailbox put/get.
    MboxBlocked,
    /// Waiting on a condition variable.
    CondBlocked,
    /// Waiting on a wait queue.
    WqBlocked,
    /// Currently running.
    Running,
    /// On a run queue, waiting to be scheduled.
    Pending,
}

impl ThreadState {
    /// Whether a thread in this state sits on its priority's run queue.
    #[inline]
    pub fn is_on_runqueue(self) -> bool {
        matches!(self, ThreadState::Running | ThreadState::Pending)
    }
}

/// Prototype of a thread entry function.
pub type ThreadFn = fn(arg: *mut ());

/// Why a thread is blocked, and the data the waker needs to finish the
/// operation on its behalf.
///
/// This replaces an untyped pointer slot: each blocking reason carries its
/// own typed payload, and mismatched wake-ups are structurally impossible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum WaitData {
    None,
    /// `ReceiveBlocked`: the sender stores the delivered message here.
    Receive(Option<Msg>),
    /// `SendBlocked`: the stashed outgoing message; `None` once taken.
    Send(Option<Msg>),
    /// `ReplyBlocked`: outgoing request (until taken) and incoming reply.
    Reply {
        outgoing: Option<Msg>,
        reply: Option<Msg>,
    },
    /// `MboxBlocked` writer: stashed message; `None` once delivered.
    MboxSend(Option<Msg>),
    /// `MboxBlocked` reader: slot the producer fills directly.
    MboxReceive(Option<Msg>),
    /// `FlagBlockedAny` / `FlagBlockedAll`: the awaited mask.
    Flags(u16),
    /// `WqBlocked`: identity of the wait queue the thread sleeps on.
    WaitQueue(usize),
}

/// Wait-queue linkage of a TCB.
///
/// Wait queues need to tell "not enqueued" apart from "last in the queue",
/// so the link carries an explicit tail marker instead of reusing `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WqLink {
    /// Not on any wait queue.
    NotQueued,
    /// Last entry of a wait queue.
    Tail,
    /// Followed by another waiting thread.
    Next(Pid),
}

/// Per-thread message queue: index buffer plus caller-owned slot storage.
#[derive(Debug)]
pub(crate) struct MsgQueue {
    pub cib: Cib,
    slots: *mut Msg,
    capacity: usize,
}

impl MsgQueue {
    pub fn new(slots: &'static mut [Msg]) -> MsgQueue {
        MsgQueue {
            cib: Cib::new(slots.len() as u32),
            capacity: slots.len(),
            slots: slots.as_mut_ptr(),
        }
    }

    pub fn write(&mut self, index: usize, msg: Msg) {
        debug_assert!(index < self.capacity);
        // SAFETY: the slot storage was handed over exclusively and for
        // 'static when the queue was installed, and the index buffer only
        // produces indices below the capacity.
        unsafe { self.slots.add(index).write(msg) }
    }

    pub fn read(&self, index: usize) -> Msg {
        debug_assert!(index < self.capacity);
        // SAFETY: as in `write`; `Msg` is `Copy`.
        unsafe { self.slots.add(index).read() }
    }
}

/// Thread control block.
///
/// The entry function and its argument are not stored here: they live in
/// the initial frame the port lays out on the thread's stack.
pub(crate) struct Tcb {
    pub pid: Pid,
    pub state: ThreadState,
    pub priority: u8,
    pub name: &'static str,
    /// Stored stack pointer while the thread is switched out.
    pub sp: *mut u8,
    pub stack: *mut u8,
    pub stack_size: usize,
    /// Currently set thread flags.
    pub flags: u16,
    /// Circular run-queue linkage, `None` while off the run queues.
    pub rq_next: Option<Pid>,
    pub rq_prev: Option<Pid>,
    /// Singly linked wait-list linkage (mutex, condvar, msg, mbox).
    pub wait_next: Option<Pid>,
    /// Wait-queue linkage, separate so it can carry the tail marker.
    pub wq_next: WqLink,
    pub wait_data: WaitData,
    /// Senders blocked on this thread, ordered by priority.
    pub msg_waiters: ThreadList,
    pub msg_queue: Option<MsgQueue>,
}

// SAFETY: TCBs carry raw pointers into caller-provided 'static storage
// (stack and message slots). The kernel runs in a single address space on
// a single CPU and only touches them with interrupts masked, so moving
// the table between host test threads is sound.
unsafe impl Send for Tcb {}

impl Tcb {
    /// Whether this thread is linked into a wait queue.
    #[inline]
    pub fn is_in_wq(&self) -> bool {
        self.wq_next != WqLink::NotQueued
    }
}

/// Fixed-size thread table indexed by PID.
pub(crate) struct ThreadTable {
    slots: [Option<Tcb>; MAX_THREADS],
}

impl ThreadTable {
    pub const fn new() -> Self {
        ThreadTable {
            slots: [const { None }; MAX_THREADS],
        }
    }

    pub fn get(&self, pid: Pid) -> Option<&Tcb> {
        if pid == Pid::UNDEF || pid == Pid::ISR || pid.index() >= MAX_THREADS {
            return None;
        }
        self.slots[pid.index()].as_ref()
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Tcb> {
        if pid == Pid::UNDEF || pid == Pid::ISR || pid.index() >= MAX_THREADS {
            return None;
        }
        self.slots[pid.index()].as_mut()
    }

    /// Thread lookup that treats a dangling PID as a programming bug.
    pub fn thread(&self, pid: Pid) -> &Tcb {
        match self.get(pid) {
            Some(tcb) => tcb,
            None => panic!("no thread with PID {}", pid),
        }
    }

    /// See [`ThreadTable::thread`].
    pub fn thread_mut(&mut self, pid: Pid) -> &mut Tcb {
        match self.get_mut(pid) {
            Some(tcb) => tcb,
            None => panic!("no thread with PID {}", pid),
        }
    }

    /// Place a new TCB into the first free slot and assign its PID.
    pub fn insert(&mut self, mut tcb: Tcb) -> KernelResult<Pid> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                let pid = Pid::from_index(index);
                tcb.pid = pid;
                *slot = Some(tcb);
                return Ok(pid);
            }
        }
        Err(KernelError::ThreadTableFull)
    }

    /// Release a PID's slot. The thread must already be off all queues.
    pub fn free(&mut self, pid: Pid) {
        debug_assert!(self.slots[pid.index()].is_some());
        self.slots[pid.index()] = None;
    }

    pub fn count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}
