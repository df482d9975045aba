//! Mailbox
//!
//! A bounded, multi-producer multi-consumer queue of messages with
//! symmetric blocking: a full mailbox parks writers, an empty one parks
//! readers. The index layer is a [`Cib`], so the capacity must be a power
//! of two; a capacity of zero turns the mailbox into a pure rendezvous
//! where every `put` meets a `get` directly.
//!
//! The non-blocking variants are legal from interrupt context.

use crate::cib::Cib;
use crate::error::{KernelError, KernelResult};
use crate::ipc::Msg;
use crate::irq::{self, IrqLock};
use crate::list::ThreadList;
use crate::sched::tcb::WaitData;
use crate::sched::{self, Kernel, Pid, ThreadState};

struct MboxInner {
    readers: ThreadList,
    writers: ThreadList,
    cib: Cib,
    slots: *mut Msg,
    capacity: usize,
}

// SAFETY: the slot pointer refers to storage handed over exclusively and
// for 'static at construction; it is only dereferenced with interrupts
// masked on a single CPU.
unsafe impl Send for MboxInner {}

impl MboxInner {
    fn write(&mut self, index: usize, msg: Msg) {
        debug_assert!(index < self.capacity);
        // SAFETY: exclusive 'static storage, index bounded by the Cib.
        unsafe { self.slots.add(index).write(msg) }
    }

    fn read(&self, index: usize) -> Msg {
        debug_assert!(index < self.capacity);
        // SAFETY: as in `write`; `Msg` is `Copy`.
        unsafe { self.slots.add(index).read() }
    }
}

/// Bounded mailbox over caller-owned message slots.
pub struct Mbox {
    inner: IrqLock<MboxInner>,
}

#[derive(Debug, PartialEq)]
enum PutOutcome {
    Delivered(Option<u8>),
    Full,
    Blocked,
}

#[derive(Debug, PartialEq)]
enum GetOutcome {
    Got(Msg, Option<u8>),
    Empty,
    Blocked,
}

impl Mbox {
    /// Create a mailbox over the given slot storage, whose length must be
    /// zero or a power of two.
    pub fn new(slots: &'static mut [Msg]) -> Mbox {
        Mbox {
            inner: IrqLock::new(MboxInner {
                readers: ThreadList::new(),
                writers: ThreadList::new(),
                cib: Cib::new(slots.len() as u32),
                capacity: slots.len(),
                slots: slots.as_mut_ptr(),
            }),
        }
    }

    /// Queue capacity (0 for a rendezvous mailbox).
    pub fn size(&self) -> usize {
        self.inner.with(|inner| {
            if inner.capacity == 0 {
                0
            } else {
                inner.cib.capacity() as usize
            }
        })
    }

    /// Messages that can be taken without blocking.
    pub fn avail(&self) -> usize {
        self.inner.with(|inner| inner.cib.avail() as usize)
    }

    /// Invalidate the mailbox: drop queued messages and detach the slots.
    ///
    /// Must not be called while threads are blocked on the mailbox.
    pub fn unset(&self) {
        self.inner.with(|inner| {
            debug_assert!(inner.readers.is_empty() && inner.writers.is_empty());
            inner.cib = Cib::new(0);
            inner.capacity = 0;
            inner.slots = core::ptr::null_mut();
        });
    }

    fn put_inner(&self, k: &mut Kernel, mut msg: Msg, blocking: bool) -> PutOutcome {
        self.inner.with(|inner| {
            msg.sender_pid = if irq::is_in() { Pid::ISR } else { k.active };

            // A parked reader only exists while the queue is empty, so it
            // gets the message directly.
            if let Some(reader) = inner.readers.pop_head(&mut k.table) {
                let tcb = k.table.thread_mut(reader);
                match &mut tcb.wait_data {
                    WaitData::MboxReceive(slot) => *slot = Some(msg),
                    other => panic!("mbox reader {} has wait data {:?}", reader, other),
                }
                let priority = tcb.priority;
                k.set_status(reader, ThreadState::Pending);
                return PutOutcome::Delivered(Some(priority));
            }

            if let Some(index) = inner.cib.put() {
                inner.write(index, msg);
                return PutOutcome::Delivered(None);
            }

            if !blocking {
                return PutOutcome::Full;
            }

            let me = k.active;
            k.table.thread_mut(me).wait_data = WaitData::MboxSend(Some(msg));
            k.set_status(me, ThreadState::MboxBlocked);
            inner.writers.insert_by_prio(&mut k.table, me);
            PutOutcome::Blocked
        })
    }

    fn get_inner(&self, k: &mut Kernel, blocking: bool) -> GetOutcome {
        self.inner.with(|inner| {
            if let Some(index) = inner.cib.get() {
                let msg = inner.read(index);
                // The freed slot completes the most urgent parked writer.
                let woken = match inner.writers.pop_head(&mut k.table) {
                    Some(writer) => {
                        let stashed = take_writer_stash(k, writer);
                        match inner.cib.put() {
                            Some(slot) => inner.write(slot, stashed),
                            None => panic!("freed mailbox slot vanished"),
                        }
                        let priority = k.table.thread(writer).priority;
                        k.set_status(writer, ThreadState::Pending);
                        Some(priority)
                    }
                    None => None,
                };
                return GetOutcome::Got(msg, woken);
            }

            // Empty queue: a parked writer means a rendezvous mailbox (or
            // a capacity-zero race); take its message directly.
            if let Some(writer) = inner.writers.pop_head(&mut k.table) {
                let stashed = take_writer_stash(k, writer);
                let priority = k.table.thread(writer).priority;
                k.set_status(writer, ThreadState::Pending);
                return GetOutcome::Got(stashed, Some(priority));
            }

            if !blocking {
                return GetOutcome::Empty;
            }

            let me = k.active;
            k.table.thread_mut(me).wait_data = WaitData::MboxReceive(None);
            k.set_status(me, ThreadState::MboxBlocked);
            inner.readers.insert_by_prio(&mut k.table, me);
            GetOutcome::Blocked
        })
    }

    /// Add a message, blocking while the mailbox is full.
    pub fn put(&self, msg: Msg) {
        debug_assert!(!irq::is_in(), "cannot block on a mailbox in interrupt context");
        let me = sched::active_pid();
        loop {
            match sched::with_kernel(|k| self.put_inner(k, msg, true)) {
                PutOutcome::Delivered(woken) => {
                    if let Some(priority) = woken {
                        sched::switch(priority);
                    }
                    return;
                }
                PutOutcome::Blocked => {
                    sched::yield_higher();
                    // A get completed the delivery if the stash is gone.
                    // Woken some other way, leave the waiter list before
                    // retrying the whole put.
                    let delivered = sched::with_kernel(|k| {
                        self.inner.with(|inner| {
                            let tcb = k.table.thread_mut(me);
                            let delivered =
                                !matches!(tcb.wait_data, WaitData::MboxSend(Some(_)));
                            tcb.wait_data = WaitData::None;
                            if !delivered {
                                let mut writers = inner.writers;
                                writers.remove(&mut k.table, me);
                                inner.writers = writers;
                            }
                            delivered
                        })
                    });
                    if delivered {
                        return;
                    }
                }
                PutOutcome::Full => unreachable!("blocking put cannot decline"),
            }
        }
    }

    /// Add a message without blocking. Returns whether it was delivered.
    ///
    /// # Errors
    ///
    /// - [`KernelError::NotDelivered`] when the mailbox is full.
    pub fn try_put(&self, msg: Msg) -> KernelResult<()> {
        match sched::with_kernel(|k| self.put_inner(k, msg, false)) {
            PutOutcome::Delivered(woken) => {
                if let Some(priority) = woken {
                    if !irq::is_in() {
                        sched::switch(priority);
                    }
                }
                Ok(())
            }
            PutOutcome::Full => Err(KernelError::NotDelivered),
            PutOutcome::Blocked => unreachable!("non-blocking put cannot park"),
        }
    }

    /// Take a message, blocking while the mailbox is empty.
    pub fn get(&self) -> Msg {
        debug_assert!(!irq::is_in(), "cannot block on a mailbox in interrupt context");
        let me = sched::active_pid();
        loop {
            match sched::with_kernel(|k| self.get_inner(k, true)) {
                GetOutcome::Got(msg, woken) => {
                    if let Some(priority) = woken {
                        sched::switch(priority);
                    }
                    return msg;
                }
                GetOutcome::Blocked => {
                    sched::yield_higher();
                    let msg = sched::with_kernel(|k| {
                        self.inner.with(|inner| {
                            let tcb = k.table.thread_mut(me);
                            let msg = match &mut tcb.wait_data {
                                WaitData::MboxReceive(stash) => stash.take(),
                                _ => None,
                            };
                            tcb.wait_data = WaitData::None;
                            if msg.is_none() {
                                let mut readers = inner.readers;
                                readers.remove(&mut k.table, me);
                                inner.readers = readers;
                            }
                            msg
                        })
                    });
                    if let Some(msg) = msg {
                        return msg;
                    }
                }
                GetOutcome::Empty => unreachable!("blocking get cannot decline"),
            }
        }
    }

    /// Take a message without blocking.
    ///
    /// # Errors
    ///
    /// - [`KernelError::WouldBlock`] when the mailbox is empty.
    pub fn try_get(&self) -> KernelResult<Msg> {
        match sched::with_kernel(|k| self.get_inner(k, false)) {
            GetOutcome::Got(msg, woken) => {
                if let Some(priority) = woken {
                    if !irq::is_in() {
                        sched::switch(priority);
                    }
                }
                Ok(msg)
            }
            GetOutcome::Empty => Err(KernelError::WouldBlock),
            GetOutcome::Blocked => unreachable!("non-blocking get cannot park"),
        }
    }
}

/// Take a parked writer's stashed message.
fn take_writer_stash(k: &mut Kernel, writer: Pid) -> Msg {
    let tcb = k.table.thread_mut(writer);
    match &mut tcb.wait_data {
        WaitData::MboxSend(stash) => match stash.take() {
            Some(msg) => {
                tcb.wait_data = WaitData::None;
                msg
            }
            None => panic!("mbox writer {} has no stashed message", writer),
        },
        other => panic!("mbox writer {} has wait data {:?}", writer, other),
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::testing;
    use crate::thread;

    fn mbox(capacity: usize) -> Mbox {
        Mbox::new(testing::leak(std::vec![Msg::default(); capacity]))
    }

    #[test]
    fn try_roundtrip_preserves_the_message() {
        let _t = testing::lock();
        testing::create_thread(thread::PRIORITY_IDLE, "idle");
        let pid = testing::create_thread(4, "t");
        assert_eq!(sched::run(), pid);

        let mb = mbox(4);
        assert_eq!(mb.size(), 4);
        assert_eq!(mb.avail(), 0);

        let sent = Msg::value(21, 42);
        mb.try_put(sent).unwrap();
        assert_eq!(mb.avail(), 1);

        let got = mb.try_get().unwrap();
        assert_eq!(got.kind, sent.kind);
        assert_eq!(got.content, sent.content);
        assert_eq!(got.sender_pid, pid);
    }

    #[test]
    fn try_put_full_and_try_get_empty_fail() {
        let _t = testing::lock();
        testing::create_thread(thread::PRIORITY_IDLE, "idle");
        let pid = testing::create_thread(4, "t");
        assert_eq!(sched::run(), pid);

        let mb = mbox(2);
        assert_eq!(mb.try_get(), Err(KernelError::WouldBlock));
        mb.try_put(Msg::value(1, 0)).unwrap();
        mb.try_put(Msg::value(2, 0)).unwrap();
        assert_eq!(mb.try_put(Msg::value(3, 0)), Err(KernelError::NotDelivered));
    }

    #[test]
    fn messages_come_out_in_order() {
        let _t = testing::lock();
        testing::create_thread(thread::PRIORITY_IDLE, "idle");
        let pid = testing::create_thread(4, "t");
        assert_eq!(sched::run(), pid);

        let mb = mbox(4);
        for i in 0..4 {
            mb.try_put(Msg::value(i, 0)).unwrap();
        }
        for i in 0..4 {
            assert_eq!(mb.try_get().unwrap().kind, i);
        }
    }

    #[test]
    fn blocked_writer_completes_on_get() {
        let _t = testing::lock();
        testing::create_thread(thread::PRIORITY_IDLE, "idle");
        let consumer = testing::create_thread(3, "consumer");
        let producer = testing::create_thread(5, "producer");

        let mb = mbox(4);

        testing::set_active(producer);
        for i in 0..4 {
            mb.try_put(Msg::value(i, 0)).unwrap();
        }
        // The fifth put parks the producer with the message stashed.
        let outcome = sched::with_kernel(|k| mb.put_inner(k, Msg::value(4, 0), true));
        assert_eq!(outcome, PutOutcome::Blocked);
        assert_eq!(
            thread::get_status(producer),
            Some(ThreadState::MboxBlocked)
        );

        // One get frees a slot; the stashed message moves in and the
        // producer is runnable with its put complete.
        testing::set_active(consumer);
        assert_eq!(mb.get().kind, 0);
        assert_eq!(mb.avail(), 4);
        assert_eq!(thread::get_status(producer), Some(ThreadState::Pending));
        sched::with_kernel(|k| {
            assert_eq!(k.table.thread(producer).wait_data, WaitData::None);
        });

        // Delivery order survived the parking.
        for i in 1..5 {
            assert_eq!(mb.get().kind, i);
        }
    }

    #[test]
    fn blocked_reader_gets_direct_delivery() {
        let _t = testing::lock();
        testing::create_thread(thread::PRIORITY_IDLE, "idle");
        let consumer = testing::create_thread(3, "consumer");
        let producer = testing::create_thread(5, "producer");

        let mb = mbox(4);

        testing::set_active(consumer);
        let outcome = sched::with_kernel(|k| mb.get_inner(k, true));
        assert_eq!(outcome, GetOutcome::Blocked);
        assert_eq!(sched::run(), producer);

        // The consumer outranks the producer and runs at once; nothing
        // lands in the queue.
        mb.put(Msg::value(9, 0));
        assert_eq!(mb.avail(), 0);
        assert_eq!(thread::getpid(), consumer);
        let msg = sched::with_kernel(|k| {
            match &mut k.table.thread_mut(consumer).wait_data {
                WaitData::MboxReceive(stash) => stash.take().unwrap(),
                other => panic!("unexpected wait data {:?}", other),
            }
        });
        assert_eq!((msg.kind, msg.sender_pid), (9, producer));
    }

    #[test]
    fn zero_capacity_is_pure_rendezvous() {
        let _t = testing::lock();
        testing::create_thread(thread::PRIORITY_IDLE, "idle");
        let consumer = testing::create_thread(3, "consumer");
        let producer = testing::create_thread(5, "producer");

        let mb = mbox(0);
        assert_eq!(mb.size(), 0);

        // No reader waiting: even a non-blocking put cannot deliver.
        testing::set_active(producer);
        assert_eq!(mb.try_put(Msg::value(1, 0)), Err(KernelError::NotDelivered));

        // A parked writer hands its message straight to the getter.
        let outcome = sched::with_kernel(|k| mb.put_inner(k, Msg::value(2, 0), true));
        assert_eq!(outcome, PutOutcome::Blocked);

        testing::set_active(consumer);
        let msg = mb.try_get().unwrap();
        assert_eq!((msg.kind, msg.sender_pid), (2, producer));
        assert_eq!(thread::get_status(producer), Some(ThreadState::Pending));
    }

    #[test]
    fn isr_try_put_defers_the_switch() {
        let _t = testing::lock();
        testing::create_thread(thread::PRIORITY_IDLE, "idle");
        let consumer = testing::create_thread(2, "consumer");
        let other = testing::create_thread(6, "other");

        let mb = mbox(2);

        testing::set_active(consumer);
        let outcome = sched::with_kernel(|k| mb.get_inner(k, true));
        assert_eq!(outcome, GetOutcome::Blocked);
        assert_eq!(sched::run(), other);

        testing::in_isr(|| {
            mb.try_put(Msg::value(7, 0)).unwrap();
            assert_eq!(thread::getpid(), other);
        });
        assert_eq!(thread::getpid(), consumer);

        let msg = sched::with_kernel(|k| {
            match &mut k.table.thread_mut(consumer).wait_data {
                WaitData::MboxReceive(stash) => stash.take().unwrap(),
                other => panic!("unexpected wait data {:?}", other),
            }
        });
        assert_eq!(msg.sender_pid, Pid::ISR);
    }

    #[test]
    fn unset_invalidates_the_queue() {
        let _t = testing::lock();
        testing::create_thread(thread::PRIORITY_IDLE, "idle");
        let pid = testing::create_thread(4, "t");
        assert_eq!(sched::run(), pid);

        let mb = mbox(2);
        mb.try_put(Msg::value(1, 0)).unwrap();
        mb.unset();
        assert_eq!(mb.size(), 0);
        assert_eq!(mb.try_put(Msg::value(2, 0)), Err(KernelError::NotDelivered));
    }
}
