//! Thread synchronization primitives
//!
//! All three primitives park threads on priority-sorted intrusive wait
//! lists and re-dispatch through the scheduler. The mutex hands its lock
//! to the next waiter on unlock; the condition variable has Mesa
//! semantics; the wait queue covers the case where the signal comes from
//! an interrupt handler and no mutex can be taken.

mod cond;
mod mutex;
mod wait_queue;

pub use cond::Cond;
pub use mutex::Mutex;
pub use wait_queue::WaitQueue;
