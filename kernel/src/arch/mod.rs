//! Architecture port layer
//!
//! Everything the portable kernel needs from a CPU port goes through this
//! module: masking and restoring interrupt delivery, the in-ISR flag,
//! requesting a context switch, preparing an initial thread stack, and the
//! platform power-mode hook.
//!
//! Two ports are provided:
//! - `hosted`: simulation used on any target with an operating system
//!   (`cargo test` on a development machine). The interrupt enable bit and
//!   the in-ISR flag are process-global atomics, and a context switch
//!   performs the scheduler bookkeeping without touching real stacks.
//! - `x86_64`: bare-metal port delegating to the CPU's interrupt flag.

#[cfg(not(target_os = "none"))]
mod hosted;
#[cfg(not(target_os = "none"))]
pub use hosted::*;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod x86_64;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use self::x86_64::*;
