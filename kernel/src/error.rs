//! Error types for the MicaOS kernel core
//!
//! Recoverable conditions are reported by value through [`KernelError`];
//! invariant violations (blocking from interrupt context, unbalanced
//! power-mode unblocks, corrupt run queues) are programming bugs and are
//! surfaced with `panic!`/`debug_assert!` instead.

use core::fmt;

use crate::sched::Pid;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Priority is outside the configured priority levels.
    InvalidPriority { priority: u8 },
    /// No free slot in the thread table.
    ThreadTableFull,
    /// No thread with this PID exists.
    NoSuchThread { pid: Pid },
    /// `wakeup` was called on a thread that is not sleeping.
    ThreadNotSleeping { pid: Pid },
    /// A non-blocking delivery found no receiver and no queue space.
    NotDelivered,
    /// The operation would have to block and was asked not to.
    WouldBlock,
    /// `reply` targeted a thread that is not waiting for a reply.
    NoReplyExpected { pid: Pid },
    /// A message queue must have a power-of-two number of slots.
    QueueNotPowerOfTwo { len: usize },
    /// The process-wide message bus ID space (2048 buses) is exhausted.
    BusLimitReached,
}

/// Result type used throughout the kernel.
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::InvalidPriority { priority } => {
                write!(f, "invalid thread priority {}", priority)
            }
            KernelError::ThreadTableFull => write!(f, "thread table is full"),
            KernelError::NoSuchThread { pid } => write!(f, "no such thread: {}", pid),
            KernelError::ThreadNotSleeping { pid } => {
                write!(f, "thread {} is not sleeping", pid)
            }
            KernelError::NotDelivered => write!(f, "message not delivered"),
            KernelError::WouldBlock => write!(f, "operation would block"),
            KernelError::NoReplyExpected { pid } => {
                write!(f, "thread {} is not waiting for a reply", pid)
            }
            KernelError::QueueNotPowerOfTwo { len } => {
                write!(f, "queue length {} is not a power of two", len)
            }
            KernelError::BusLimitReached => write!(f, "message bus ID space exhausted"),
        }
    }
}
