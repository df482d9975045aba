//! Synchronous messaging with optional per-thread queues
//!
//! By default delivery is a rendezvous: a send succeeds immediately only
//! if the receiver is already waiting, otherwise the sender either backs
//! off (non-blocking) or parks itself on the receiver's sender list. A
//! thread that installs a message queue with [`init_queue`] additionally
//! accepts messages asynchronously until the queue fills up, at which
//! point the rendezvous rules return.
//!
//! Interrupt handlers use [`send_int`], which never blocks and stamps
//! [`Pid::ISR`] as the sender.

use crate::error::{KernelError, KernelResult};
use crate::ipc::Msg;
use crate::irq;
use crate::sched::tcb::{MsgQueue, WaitData};
use crate::sched::{self, Kernel, Pid, ThreadState};

/// Install a message queue for the calling thread.
///
/// The slot storage is handed over for the process lifetime; its length
/// must be a power of two.
pub fn init_queue(slots: &'static mut [Msg]) -> KernelResult<()> {
    let len = slots.len();
    if len == 0 || !len.is_power_of_two() {
        return Err(KernelError::QueueNotPowerOfTwo { len });
    }
    sched::with_kernel(|k| {
        let me = k.active;
        k.table.thread_mut(me).msg_queue = Some(MsgQueue::new(slots));
    });
    Ok(())
}

/// Messages waiting in the calling thread's queue.
pub fn avail() -> usize {
    sched::with_kernel(|k| {
        let me = k.active;
        match &k.table.thread(me).msg_queue {
            Some(queue) => queue.cib.avail() as usize,
            None => 0,
        }
    })
}

pub(crate) enum SendOutcome {
    /// Copied to the receiver or its queue; carries the receiver's
    /// priority when it was woken and may need the CPU.
    Delivered(Option<u8>),
    NotDelivered,
    InvalidTarget,
    /// The sender was parked on the receiver's sender list.
    Blocked,
}

/// Take the stashed outgoing message of a parked sender and, unless it is
/// waiting for a reply, make it runnable again.
fn finish_sender(k: &mut Kernel, sender: Pid) -> (Msg, Option<u8>) {
    let tcb = k.table.thread_mut(sender);
    let msg = match &mut tcb.wait_data {
        WaitData::Send(stash) => {
            let msg = stash.take();
            tcb.wait_data = WaitData::None;
            msg
        }
        WaitData::Reply { outgoing, .. } => outgoing.take(),
        other => panic!("parked sender {} has wait data {:?}", sender, other),
    };
    let msg = match msg {
        Some(msg) => msg,
        None => panic!("parked sender {} has no stashed message", sender),
    };

    if k.table.thread(sender).state == ThreadState::SendBlocked {
        let priority = k.table.thread(sender).priority;
        k.set_status(sender, ThreadState::Pending);
        (msg, Some(priority))
    } else {
        // A send-and-wait sender sleeps on until the reply arrives.
        (msg, None)
    }
}

/// Core delivery path shared by every send variant.
fn deliver(k: &mut Kernel, mut msg: Msg, sender: Pid, target: Pid, blocking: bool) -> SendOutcome {
    msg.sender_pid = sender;

    let Some(tcb) = k.table.get_mut(target) else {
        return SendOutcome::InvalidTarget;
    };

    if tcb.state == ThreadState::ReceiveBlocked {
        match &mut tcb.wait_data {
            WaitData::Receive(slot) => *slot = Some(msg),
            other => panic!("receive-blocked thread {} has wait data {:?}", target, other),
        }
        let priority = tcb.priority;
        k.set_status(target, ThreadState::Pending);
        return SendOutcome::Delivered(Some(priority));
    }

    if let Some(queue) = tcb.msg_queue.as_mut() {
        if let Some(index) = queue.cib.put() {
            queue.write(index, msg);
            return SendOutcome::Delivered(None);
        }
    }

    if !blocking {
        log::debug!("msg: dropped {} -> {} (receiver not ready)", sender, target);
        return SendOutcome::NotDelivered;
    }

    // Park the sender. A send-and-wait caller is already reply-blocked
    // and stashes into its reply slot instead.
    let me = k.active;
    debug_assert!(me != target);
    if k.table.thread(me).state == ThreadState::ReplyBlocked {
        k.table.thread_mut(me).wait_data = WaitData::Reply {
            outgoing: Some(msg),
            reply: None,
        };
    } else {
        k.table.thread_mut(me).wait_data = WaitData::Send(Some(msg));
        k.set_status(me, ThreadState::SendBlocked);
    }
    let mut waiters = k.table.thread(target).msg_waiters;
    waiters.insert_by_prio(&mut k.table, me);
    k.table.thread_mut(target).msg_waiters = waiters;
    SendOutcome::Blocked
}

fn send_to_self(k: &mut Kernel, mut msg: Msg) -> KernelResult<()> {
    let me = k.active;
    msg.sender_pid = me;
    let tcb = k.table.thread_mut(me);
    if let Some(queue) = tcb.msg_queue.as_mut() {
        if let Some(index) = queue.cib.put() {
            queue.write(index, msg);
            return Ok(());
        }
    }
    // Blocking on a message to ourselves would deadlock.
    Err(KernelError::NotDelivered)
}

/// Send a message, blocking until it is delivered.
///
/// Returns immediately when the receiver is waiting or has queue space;
/// otherwise the caller sleeps until the receiver picks the message up.
/// From interrupt context this degrades to [`send_int`].
///
/// # Errors
///
/// - [`KernelError::NoSuchThread`] if `target` names no live thread.
/// - [`KernelError::NotDelivered`] for an undeliverable send-to-self.
pub fn send(msg: Msg, target: Pid) -> KernelResult<()> {
    if irq::is_in() {
        return send_int(msg, target);
    }
    let me = sched::active_pid();
    if target == me {
        return sched::with_kernel(|k| send_to_self(k, msg));
    }

    match sched::with_kernel(|k| deliver(k, msg, me, target, true)) {
        SendOutcome::Delivered(preempt) => {
            if let Some(priority) = preempt {
                sched::switch(priority);
            }
            Ok(())
        }
        SendOutcome::InvalidTarget => Err(KernelError::NoSuchThread { pid: target }),
        SendOutcome::Blocked => {
            // Runs again once a receive on the target consumed the stash.
            sched::yield_higher();
            Ok(())
        }
        SendOutcome::NotDelivered => unreachable!("blocking send cannot drop"),
    }
}

/// Send without ever blocking.
///
/// # Errors
///
/// - [`KernelError::NoSuchThread`] if `target` names no live thread.
/// - [`KernelError::NotDelivered`] if the receiver is neither waiting nor
///   has queue space; the message is dropped.
pub fn try_send(msg: Msg, target: Pid) -> KernelResult<()> {
    let me = if irq::is_in() {
        Pid::ISR
    } else {
        sched::active_pid()
    };
    if target == me {
        return sched::with_kernel(|k| send_to_self(k, msg));
    }
    match sched::with_kernel(|k| deliver(k, msg, me, target, false)) {
        SendOutcome::Delivered(preempt) => {
            if let Some(priority) = preempt {
                if !irq::is_in() {
                    sched::switch(priority);
                }
            }
            Ok(())
        }
        SendOutcome::InvalidTarget => Err(KernelError::NoSuchThread { pid: target }),
        SendOutcome::NotDelivered => Err(KernelError::NotDelivered),
        SendOutcome::Blocked => unreachable!("non-blocking send cannot park"),
    }
}

/// Send from an interrupt handler. Never blocks, never switches; a wake
/// of a more urgent receiver is honored on interrupt return.
///
/// # Errors
///
/// As for [`try_send`].
pub fn send_int(msg: Msg, target: Pid) -> KernelResult<()> {
    match sched::with_kernel(|k| deliver(k, msg, Pid::ISR, target, false)) {
        SendOutcome::Delivered(_) => Ok(()),
        SendOutcome::InvalidTarget => Err(KernelError::NoSuchThread { pid: target }),
        SendOutcome::NotDelivered => Err(KernelError::NotDelivered),
        SendOutcome::Blocked => unreachable!("non-blocking send cannot park"),
    }
}

/// Non-blocking delivery of a pre-assembled message on behalf of the
/// message bus. Returns the woken receiver's priority, if any; the caller
/// decides when to preempt.
pub(crate) fn post_event(
    k: &mut Kernel,
    msg: Msg,
    sender: Pid,
    target: Pid,
) -> KernelResult<Option<u8>> {
    match deliver(k, msg, sender, target, false) {
        SendOutcome::Delivered(woken) => Ok(woken),
        SendOutcome::InvalidTarget => Err(KernelError::NoSuchThread { pid: target }),
        SendOutcome::NotDelivered => Err(KernelError::NotDelivered),
        SendOutcome::Blocked => unreachable!("non-blocking send cannot park"),
    }
}

pub(crate) enum RecvOutcome {
    Got(Msg),
    WouldBlock,
    /// The caller was marked receive-blocked.
    Blocked,
}

/// Non-suspending half of a receive: drain the own queue, then parked
/// senders, then optionally park the caller. Returns the outcome plus the
/// priority of a sender that became runnable.
pub(crate) fn fetch(k: &mut Kernel, blocking: bool) -> (RecvOutcome, Option<u8>) {
    let me = k.active;

    let queued = match k.table.thread_mut(me).msg_queue.as_mut() {
        Some(queue) => queue.cib.get().map(|index| queue.read(index)),
        None => None,
    };

    let mut waiters = k.table.thread(me).msg_waiters;
    let sender = waiters.pop_head(&mut k.table);
    k.table.thread_mut(me).msg_waiters = waiters;

    match (queued, sender) {
        (Some(msg), None) => (RecvOutcome::Got(msg), None),
        (Some(msg), Some(sender)) => {
            // Keep the queue full: the freed slot takes the most urgent
            // parked sender's message.
            let (stashed, woken) = finish_sender(k, sender);
            match k.table.thread_mut(me).msg_queue.as_mut() {
                Some(queue) => match queue.cib.put() {
                    Some(index) => queue.write(index, stashed),
                    None => panic!("freed queue slot vanished"),
                },
                None => panic!("freed queue slot vanished"),
            }
            (RecvOutcome::Got(msg), woken)
        }
        (None, Some(sender)) => {
            let (stashed, woken) = finish_sender(k, sender);
            (RecvOutcome::Got(stashed), woken)
        }
        (None, None) => {
            if !blocking {
                return (RecvOutcome::WouldBlock, None);
            }
            k.table.thread_mut(me).wait_data = WaitData::Receive(None);
            k.set_status(me, ThreadState::ReceiveBlocked);
            (RecvOutcome::Blocked, None)
        }
    }
}

/// Take a message stashed into this thread's receive slot, if any.
fn take_stash(k: &mut Kernel, pid: Pid) -> Option<Msg> {
    let tcb = k.table.thread_mut(pid);
    match &mut tcb.wait_data {
        WaitData::Receive(stash) => {
            let msg = stash.take();
            if msg.is_some() {
                tcb.wait_data = WaitData::None;
            }
            msg
        }
        _ => None,
    }
}

/// Receive a message, blocking until one arrives.
pub fn receive() -> Msg {
    debug_assert!(!irq::is_in(), "cannot receive in interrupt context");
    let me = sched::active_pid();
    loop {
        let (outcome, woken) = sched::with_kernel(|k| fetch(k, true));
        if let Some(priority) = woken {
            sched::switch(priority);
        }
        match outcome {
            RecvOutcome::Got(msg) => return msg,
            RecvOutcome::Blocked => {
                sched::yield_higher();
                if let Some(msg) = sched::with_kernel(|k| take_stash(k, me)) {
                    return msg;
                }
                // Woken without a message (external wakeup); check again.
            }
            RecvOutcome::WouldBlock => unreachable!("blocking fetch cannot decline"),
        }
    }
}

/// Receive without blocking.
pub fn try_receive() -> Option<Msg> {
    let (outcome, woken) = sched::with_kernel(|k| fetch(k, false));
    if let Some(priority) = woken {
        sched::switch(priority);
    }
    match outcome {
        RecvOutcome::Got(msg) => Some(msg),
        RecvOutcome::WouldBlock => None,
        RecvOutcome::Blocked => unreachable!("non-blocking fetch cannot park"),
    }
}

/// Send a message and block until the receiver replies to it.
///
/// # Errors
///
/// - [`KernelError::NoSuchThread`] if `target` names no live thread.
pub fn send_receive(msg: Msg, target: Pid) -> KernelResult<Msg> {
    debug_assert!(!irq::is_in(), "cannot send-and-wait in interrupt context");
    let me = sched::active_pid();
    debug_assert!(me != target, "send-and-wait to self would deadlock");

    sched::with_kernel(|k| {
        if k.table.get(target).is_none() {
            return Err(KernelError::NoSuchThread { pid: target });
        }
        k.table.thread_mut(me).wait_data = WaitData::Reply {
            outgoing: None,
            reply: None,
        };
        k.set_status(me, ThreadState::ReplyBlocked);
        match deliver(k, msg, me, target, true) {
            SendOutcome::Delivered(_) | SendOutcome::Blocked => Ok(()),
            SendOutcome::InvalidTarget => unreachable!("target checked above"),
            SendOutcome::NotDelivered => unreachable!("blocking send cannot drop"),
        }
    })?;

    loop {
        sched::yield_higher();
        let reply = sched::with_kernel(|k| {
            let tcb = k.table.thread_mut(me);
            match &mut tcb.wait_data {
                WaitData::Reply { reply, .. } => {
                    let msg = reply.take();
                    if msg.is_some() {
                        tcb.wait_data = WaitData::None;
                    }
                    msg
                }
                _ => None,
            }
        });
        if let Some(reply) = reply {
            return Ok(reply);
        }
    }
}

/// Reply to a message received from a [`send_receive`] caller.
///
/// # Errors
///
/// - [`KernelError::NoSuchThread`] if the requester is gone.
/// - [`KernelError::NoReplyExpected`] if it is not waiting for a reply.
pub fn reply(request: &Msg, mut response: Msg) -> KernelResult<()> {
    let target = request.sender_pid;
    let priority = sched::with_kernel(|k| {
        response.sender_pid = if irq::is_in() { Pid::ISR } else { k.active };
        let tcb = k
            .table
            .get_mut(target)
            .ok_or(KernelError::NoSuchThread { pid: target })?;
        if tcb.state != ThreadState::ReplyBlocked {
            return Err(KernelError::NoReplyExpected { pid: target });
        }
        match &mut tcb.wait_data {
            WaitData::Reply { reply, .. } => *reply = Some(response),
            _ => return Err(KernelError::NoReplyExpected { pid: target }),
        }
        let priority = tcb.priority;
        k.set_status(target, ThreadState::Pending);
        Ok(priority)
    })?;
    sched::switch(priority);
    Ok(())
}
