//! Message bus
//!
//! Process-wide publish/subscribe broadcast layered over the message
//! primitive. A bus is a list of subscriber entries; posting an event
//! sends one non-blocking message per matching subscriber. The 16-bit
//! message type carries the bus identity in its upper 11 bits and the
//! event in the lower 5, so a receiver attached to several buses can
//! demultiplex with [`MsgBus::is_from_bus`] and [`event_type`].
//!
//! Delivery is best effort: subscribers with full queues miss the event,
//! and the posting side never blocks, which makes `post` legal from
//! interrupt handlers.

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::{KernelError, KernelResult};
use crate::ipc::{msg, Msg, MsgContent};
use crate::irq::{self, IrqLock};
use crate::sched::{self, Pid};

/// Maximum number of buses a process can initialize.
pub const MAX_BUSES: u16 = 2048;

/// Number of event types per bus.
pub const EVENT_TYPES: u8 = 32;

/// Process-wide monotonic bus ID allocator.
static BUS_COUNT: IrqLock<u16> = IrqLock::new(0);

/// Subscriber entry, owned by the subscribing side and linked into the
/// bus on [`MsgBus::attach`].
pub struct BusEntry {
    next: Cell<*const BusEntry>,
    event_mask: AtomicU32,
    pid: Cell<Pid>,
}

// SAFETY: `next` and `pid` are only touched with interrupts masked inside
// the owning bus's critical sections; the mask is atomic. Single CPU.
unsafe impl Sync for BusEntry {}

impl BusEntry {
    pub const fn new() -> Self {
        BusEntry {
            next: Cell::new(core::ptr::null()),
            event_mask: AtomicU32::new(0),
            pid: Cell::new(Pid::UNDEF),
        }
    }

    /// Start receiving events of the given type (`0..32`).
    pub fn subscribe(&self, event: u8) {
        debug_assert!(event < EVENT_TYPES);
        self.event_mask.fetch_or(1 << event, Ordering::Relaxed);
    }

    /// Stop receiving events of the given type.
    pub fn unsubscribe(&self, event: u8) {
        debug_assert!(event < EVENT_TYPES);
        self.event_mask.fetch_and(!(1u32 << event), Ordering::Relaxed);
    }
}

impl Default for BusEntry {
    fn default() -> Self {
        Self::new()
    }
}

struct BusState {
    subs: *const BusEntry,
    id: Option<u16>,
}

// SAFETY: the subscriber pointers refer to 'static entries and are only
// followed with interrupts masked on a single CPU.
unsafe impl Send for BusState {}

/// A message bus.
pub struct MsgBus {
    state: IrqLock<BusState>,
}

impl MsgBus {
    pub const fn new() -> Self {
        MsgBus {
            state: IrqLock::new(BusState {
                subs: core::ptr::null(),
                id: None,
            }),
        }
    }

    /// Assign this bus its process-wide ID. Buses are long-running and
    /// must be initialized before anything attaches to them.
    ///
    /// # Errors
    ///
    /// - [`KernelError::BusLimitReached`] once [`MAX_BUSES`] IDs have been
    ///   handed out; IDs are never reused.
    pub fn init(&self) -> KernelResult<u16> {
        let id = BUS_COUNT.with(|count| {
            if *count >= MAX_BUSES {
                return Err(KernelError::BusLimitReached);
            }
            let id = *count;
            *count += 1;
            Ok(id)
        })?;
        self.state.with(|state| state.id = Some(id));
        Ok(id)
    }

    /// The bus ID assigned by [`MsgBus::init`].
    pub fn id(&self) -> Option<u16> {
        self.state.with(|state| state.id)
    }

    /// Attach the calling thread's subscriber entry to the bus. The entry
    /// starts with an empty event mask.
    pub fn attach(&self, entry: &'static BusEntry) {
        self.state.with(|state| {
            entry.pid.set(sched_active());
            entry.event_mask.store(0, Ordering::Relaxed);
            entry.next.set(state.subs);
            state.subs = entry as *const BusEntry;
        });
    }

    /// Unlink a subscriber entry. Call before the subscribing thread
    /// terminates.
    pub fn detach(&self, entry: &BusEntry) {
        self.state.with(|state| {
            let target = entry as *const BusEntry;
            if state.subs == target {
                state.subs = entry.next.get();
                return;
            }
            let mut cursor = state.subs;
            while !cursor.is_null() {
                // SAFETY: subscriber entries are 'static and unlinked
                // only here, with interrupts masked.
                let current = unsafe { &*cursor };
                if current.next.get() == target {
                    current.next.set(entry.next.get());
                    return;
                }
                cursor = current.next.get();
            }
        });
    }

    /// The calling thread's subscriber entry on this bus, if attached.
    pub fn get_entry(&self) -> Option<&'static BusEntry> {
        let me = sched_active();
        self.state.with(|state| {
            let mut cursor = state.subs;
            while !cursor.is_null() {
                // SAFETY: attached entries are 'static, see `attach`.
                let current = unsafe { &*cursor };
                if current.pid.get() == me {
                    return Some(current);
                }
                cursor = current.next.get();
            }
            None
        })
    }

    /// Whether a received message was posted on this bus.
    pub fn is_from_bus(&self, msg: &Msg) -> bool {
        self.id() == Some(msg.kind >> 5)
    }

    /// Post an event to every subscriber of `event`, returning how many
    /// received it. Never blocks; full subscriber queues drop the event.
    pub fn post(&self, event: u8, arg: *const ()) -> usize {
        debug_assert!(event < EVENT_TYPES);

        let sender = if irq::is_in() {
            Pid::ISR
        } else {
            sched_active()
        };

        let (delivered, best) = self.state.with(|state| {
            let id = match state.id {
                Some(id) => id,
                None => panic!("post on an uninitialized bus"),
            };
            let message = Msg {
                sender_pid: sender,
                kind: (id << 5) | event as u16,
                content: MsgContent::Ptr(arg),
            };

            let mut delivered = 0;
            let mut best: Option<u8> = None;
            let mut cursor = state.subs;
            while !cursor.is_null() {
                // SAFETY: attached entries are 'static, see `attach`.
                let current = unsafe { &*cursor };
                if current.event_mask.load(Ordering::Relaxed) & (1 << event) != 0 {
                    let target = current.pid.get();
                    let woken = sched::with_kernel(|k| {
                        match msg::post_event(k, message, sender, target) {
                            Ok(woken) => {
                                delivered += 1;
                                woken
                            }
                            Err(_) => None,
                        }
                    });
                    if let (Some(priority), None) = (woken, best) {
                        best = Some(priority);
                    }
                }
                cursor = current.next.get();
            }
            (delivered, best)
        });

        // Preempt towards the most urgent woken subscriber, outside the
        // subscriber-list critical section.
        if let Some(priority) = best {
            sched::switch(priority);
        }
        delivered
    }
}

impl Default for MsgBus {
    fn default() -> Self {
        Self::new()
    }
}

fn sched_active() -> Pid {
    sched::active_pid()
}

/// Event type of a message received over a bus (its low 5 bits).
pub fn event_type(msg: &Msg) -> u8 {
    (msg.kind & 0x1f) as u8
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::testing;
    use crate::thread;

    fn entry() -> &'static BusEntry {
        testing::leak_value(BusEntry::new())
    }

    fn msg_queue() -> &'static mut [Msg] {
        testing::leak(std::vec![Msg::default(); 8])
    }

    #[test]
    fn ids_are_unique_and_in_range() {
        let _t = testing::lock();
        let a = MsgBus::new();
        let b = MsgBus::new();
        let c = MsgBus::new();
        let ids = [
            a.init().unwrap(),
            b.init().unwrap(),
            c.init().unwrap(),
        ];
        assert!(ids[0] < ids[1] && ids[1] < ids[2]);
        assert!(ids.iter().all(|id| *id < MAX_BUSES));
    }

    #[test]
    fn tag_helpers_split_the_type_field() {
        let _t = testing::lock();
        let bus = MsgBus::new();
        let id = bus.init().unwrap();
        let msg = Msg::new((id << 5) | 19, MsgContent::Value(0));
        assert!(bus.is_from_bus(&msg));
        assert_eq!(event_type(&msg), 19);

        let other = MsgBus::new();
        other.init().unwrap();
        assert!(!other.is_from_bus(&msg));
    }

    #[test]
    fn post_filters_on_event_masks() {
        let _t = testing::lock();
        testing::create_thread(thread::PRIORITY_IDLE, "idle");
        let main = testing::create_thread(2, "main");
        let t1 = testing::create_thread(5, "t1");
        let t2 = testing::create_thread(6, "t2");
        let t3 = testing::create_thread(7, "t3");

        let bus = MsgBus::new();
        bus.init().unwrap();

        const EXIT: u8 = 0;
        for (pid, events) in [
            (t1, &[23u8, 24, EXIT][..]),
            (t2, &[24, EXIT][..]),
            (t3, &[23, EXIT][..]),
        ] {
            testing::set_active(pid);
            msg::init_queue(msg_queue()).unwrap();
            let sub = entry();
            bus.attach(sub);
            for event in events {
                sub.subscribe(*event);
            }
        }

        testing::set_active(main);
        assert_eq!(bus.post(22, core::ptr::null()), 0);
        assert_eq!(bus.post(23, core::ptr::null()), 2);
        assert_eq!(bus.post(24, core::ptr::null()), 2);
        assert_eq!(bus.post(EXIT, core::ptr::null()), 3);

        // Per-thread deliveries: t1 {23, 24, EXIT}, t2 {24, EXIT},
        // t3 {23, EXIT}, all stamped with the posting thread.
        for (pid, expected) in [
            (t1, &[23u8, 24, EXIT][..]),
            (t2, &[24, EXIT][..]),
            (t3, &[23, EXIT][..]),
        ] {
            testing::set_active(pid);
            for want in expected {
                let got = msg::try_receive().unwrap();
                assert!(bus.is_from_bus(&got));
                assert_eq!(event_type(&got), *want);
                assert_eq!(got.sender_pid, main);
            }
            assert_eq!(msg::try_receive(), None);
        }
    }

    #[test]
    fn full_subscriber_queue_drops_the_event() {
        let _t = testing::lock();
        testing::create_thread(thread::PRIORITY_IDLE, "idle");
        let main = testing::create_thread(2, "main");
        let sub_thread = testing::create_thread(5, "sub");

        let bus = MsgBus::new();
        bus.init().unwrap();

        testing::set_active(sub_thread);
        // No message queue installed and not receive-blocked: drops.
        let sub = entry();
        bus.attach(sub);
        sub.subscribe(3);

        testing::set_active(main);
        assert_eq!(bus.post(3, core::ptr::null()), 0);
    }

    #[test]
    fn detach_stops_delivery() {
        let _t = testing::lock();
        testing::create_thread(thread::PRIORITY_IDLE, "idle");
        let main = testing::create_thread(2, "main");
        let sub_thread = testing::create_thread(5, "sub");

        let bus = MsgBus::new();
        bus.init().unwrap();

        testing::set_active(sub_thread);
        msg::init_queue(msg_queue()).unwrap();
        let sub = entry();
        bus.attach(sub);
        sub.subscribe(7);
        assert!(bus.get_entry().is_some());

        testing::set_active(main);
        assert_eq!(bus.post(7, core::ptr::null()), 1);

        bus.detach(sub);
        assert_eq!(bus.post(7, core::ptr::null()), 0);

        testing::set_active(sub_thread);
        assert!(bus.get_entry().is_none());
    }

    #[test]
    fn unsubscribe_clears_one_event() {
        let _t = testing::lock();
        testing::create_thread(thread::PRIORITY_IDLE, "idle");
        let main = testing::create_thread(2, "main");
        let sub_thread = testing::create_thread(5, "sub");

        let bus = MsgBus::new();
        bus.init().unwrap();

        testing::set_active(sub_thread);
        msg::init_queue(msg_queue()).unwrap();
        let sub = entry();
        bus.attach(sub);
        sub.subscribe(1);
        sub.subscribe(2);
        sub.unsubscribe(1);

        testing::set_active(main);
        assert_eq!(bus.post(1, core::ptr::null()), 0);
        assert_eq!(bus.post(2, core::ptr::null()), 1);
    }
}
