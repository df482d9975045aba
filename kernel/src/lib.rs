//! MicaOS kernel core
//!
//! The synchronization and IPC core of a small, preemptive, fixed
//! priority operating system for single-CPU devices: scheduler and
//! thread control blocks, mutexes, condition variables, wait queues,
//! mailboxes, synchronous messaging, a publish/subscribe message bus,
//! tasklets and the power-mode blocker, together with the primitives
//! they share (intrusive thread lists, the circular integer buffer and
//! the interrupt gate).
//!
//! The crate is `no_std` and allocation-free: every queue node is
//! embedded in a caller- or table-owned structure. On hosted targets
//! (any `cargo test` on a development machine) the architecture port is
//! a simulation and the whole state machine is exercised by the standard
//! test harness; see [`testing`].

#![no_std]

// Hosted targets link std for the test harness and the simulation
// helpers; the kernel itself stays no_std.
#[cfg(not(target_os = "none"))]
extern crate std;

pub mod arch;
pub mod cib;
pub mod error;
pub mod ipc;
pub mod irq;
pub mod kernel;
pub mod klog;
pub(crate) mod list;
pub mod pm;
pub mod sched;
pub mod sync;
pub mod tasklet;
pub mod thread;

#[cfg(not(target_os = "none"))]
pub mod testing;

pub use error::{KernelError, KernelResult};
pub use ipc::{Msg, MsgContent};
pub use sched::{Pid, ThreadState};
