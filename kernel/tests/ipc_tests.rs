//! IPC integration tests
//!
//! Mailbox, message and bus behaviour driven through the public API,
//! interleaving threads explicitly via the hosted test controls.

#![cfg(not(target_os = "none"))]

use mica_kernel::ipc::bus::{self, BusEntry, MsgBus};
use mica_kernel::ipc::mbox::Mbox;
use mica_kernel::ipc::msg;
use mica_kernel::testing;
use mica_kernel::thread::{self, PRIORITY_MAIN};
use mica_kernel::{KernelError, Msg, Pid};

#[test]
fn mailbox_try_roundtrip_and_capacity() {
    let _t = testing::lock();
    mica_kernel::kernel::init(testing::stack(1024)).unwrap();
    let me = testing::create_thread(PRIORITY_MAIN, "me");
    mica_kernel::sched::run();
    assert_eq!(thread::getpid(), me);

    let mb = Mbox::new(testing::leak(vec![Msg::default(); 4]));

    // Empty mailbox declines a get.
    assert_eq!(mb.try_get(), Err(KernelError::WouldBlock));

    // Values come back in order and carry the sender.
    for i in 0..4u16 {
        mb.try_put(Msg::value(i, u32::from(i) * 10)).unwrap();
    }
    assert_eq!(mb.avail(), 4);
    assert_eq!(mb.try_put(Msg::value(9, 9)), Err(KernelError::NotDelivered));

    for i in 0..4u16 {
        let got = mb.try_get().unwrap();
        assert_eq!(got.kind, i);
        assert_eq!(got.sender_pid, me);
    }
}

#[test]
fn message_queue_between_two_threads() {
    let _t = testing::lock();
    mica_kernel::kernel::init(testing::stack(1024)).unwrap();
    let rx = testing::create_thread(PRIORITY_MAIN, "rx");
    let tx = testing::create_thread(PRIORITY_MAIN + 1, "tx");

    testing::set_active(rx);
    msg::init_queue(testing::leak(vec![Msg::default(); 4])).unwrap();

    testing::set_active(tx);
    msg::try_send(Msg::value(1, 100), rx).unwrap();
    msg::try_send(Msg::value(2, 200), rx).unwrap();

    testing::set_active(rx);
    assert_eq!(msg::avail(), 2);
    let first = msg::try_receive().unwrap();
    assert_eq!((first.kind, first.sender_pid), (1, tx));
    assert_eq!(msg::try_receive().unwrap().kind, 2);
    assert_eq!(msg::try_receive(), None);
}

#[test]
fn bus_smoke_filtering_and_counts() {
    let _t = testing::lock();
    mica_kernel::kernel::init(testing::stack(1024)).unwrap();
    let main = testing::create_thread(PRIORITY_MAIN - 1, "main");
    let t1 = testing::create_thread(PRIORITY_MAIN, "t1");
    let t2 = testing::create_thread(PRIORITY_MAIN + 1, "t2");
    let t3 = testing::create_thread(PRIORITY_MAIN + 2, "t3");

    let bus = testing::leak_value(MsgBus::new());
    bus.init().unwrap();

    const EXIT: u8 = 0;
    let masks: [(Pid, &[u8]); 3] = [(t1, &[23, 24, EXIT]), (t2, &[24, EXIT]), (t3, &[23, EXIT])];
    for (pid, events) in masks {
        testing::set_active(pid);
        msg::init_queue(testing::leak(vec![Msg::default(); 8])).unwrap();
        let entry: &'static BusEntry = testing::leak_value(BusEntry::new());
        bus.attach(entry);
        for event in events {
            entry.subscribe(*event);
        }
    }

    testing::set_active(main);
    assert_eq!(bus.post(22, core::ptr::null()), 0);
    assert_eq!(bus.post(23, core::ptr::null()), 2);
    assert_eq!(bus.post(24, core::ptr::null()), 2);
    assert_eq!(bus.post(EXIT, core::ptr::null()), 3);

    for (pid, events) in masks {
        testing::set_active(pid);
        for want in events {
            let got = msg::try_receive().unwrap();
            assert!(bus.is_from_bus(&got));
            assert_eq!(bus::event_type(&got), *want);
            assert_eq!(got.sender_pid, main);
        }
        assert_eq!(msg::try_receive(), None);
    }

    // A foreign bus does not claim these messages.
    let other = MsgBus::new();
    other.init().unwrap();
    let tagged = Msg::new((bus.id().unwrap() << 5) | 7, mica_kernel::MsgContent::Value(0));
    assert!(!other.is_from_bus(&tagged));
}

#[test]
fn bus_ids_stay_unique() {
    let _t = testing::lock();
    let mut last = None;
    for _ in 0..8 {
        let bus = MsgBus::new();
        let id = bus.init().unwrap();
        assert!(id < bus::MAX_BUSES);
        if let Some(previous) = last {
            assert!(id > previous);
        }
        last = Some(id);
    }
}

#[test]
fn undeliverable_sends_are_dropped() {
    let _t = testing::lock();
    mica_kernel::kernel::init(testing::stack(1024)).unwrap();
    let rx = testing::create_thread(PRIORITY_MAIN, "rx");
    let tx = testing::create_thread(PRIORITY_MAIN + 1, "tx");

    // No queue: a try_send with nobody waiting is dropped.
    testing::set_active(tx);
    assert_eq!(
        msg::try_send(Msg::value(5, 0), rx),
        Err(KernelError::NotDelivered)
    );

    // The ISR variant behaves the same but stamps the ISR sender.
    testing::in_isr(|| {
        assert_eq!(
            msg::send_int(Msg::value(5, 0), rx),
            Err(KernelError::NotDelivered)
        );
    });
    let _ = tx;
}
