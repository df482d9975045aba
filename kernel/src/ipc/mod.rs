//! Inter-process communication
//!
//! Three layers share one message format: direct synchronous messaging
//! with optional per-thread queues ([`msg`]), bounded multi-producer
//! multi-consumer mailboxes ([`mbox`]), and a topic-filtered broadcast bus
//! ([`bus`]). The kernel copies messages by value and never interprets
//! their type or content.

pub mod bus;
pub mod mbox;
pub mod msg;

use crate::sched::Pid;

/// Payload of a message: a small value or an opaque pointer. The kernel
/// never reads either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgContent {
    Value(u32),
    Ptr(*const ()),
}

// SAFETY: the pointer variant is an opaque token to the kernel; all
// threads share one address space, so moving it between them is sound.
// Dereferencing it is the receiving application's contract with the
// sender.
unsafe impl Send for MsgContent {}

impl Default for MsgContent {
    fn default() -> Self {
        MsgContent::Value(0)
    }
}

/// A message that can be sent between threads.
///
/// `kind` and `content` belong to the applications on both ends;
/// `sender_pid` is always filled in by the kernel on delivery
/// ([`Pid::ISR`] for messages sent from interrupt context).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Msg {
    pub sender_pid: Pid,
    pub kind: u16,
    pub content: MsgContent,
}

impl Msg {
    pub const fn new(kind: u16, content: MsgContent) -> Self {
        Msg {
            sender_pid: Pid::UNDEF,
            kind,
            content,
        }
    }

    /// Shorthand for a value-carrying message.
    pub const fn value(kind: u16, value: u32) -> Self {
        Msg::new(kind, MsgContent::Value(value))
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn default_message_is_blank() {
        let msg = Msg::default();
        assert_eq!(msg.sender_pid, Pid::UNDEF);
        assert_eq!(msg.kind, 0);
        assert_eq!(msg.content, MsgContent::Value(0));
    }

    #[test]
    fn value_shorthand() {
        let msg = Msg::value(7, 99);
        assert_eq!(msg.kind, 7);
        assert_eq!(msg.content, MsgContent::Value(99));
    }
}
