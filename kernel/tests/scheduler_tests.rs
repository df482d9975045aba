//! Scheduler integration tests
//!
//! Drive the kernel through its public API: thread creation, priority
//! dispatch, cooperative sharing within a level, and preemption across
//! levels.

#![cfg(not(target_os = "none"))]

use mica_kernel::sched;
use mica_kernel::testing;
use mica_kernel::thread::{self, CreateFlags, PRIORITY_IDLE, PRIORITY_MAIN};
use mica_kernel::ThreadState;

fn noop(_arg: *mut ()) {}

#[test]
fn boot_then_spawn_and_preempt() {
    let _t = testing::lock();
    let idle = mica_kernel::kernel::init(testing::stack(1024)).unwrap();
    assert_eq!(thread::getpid(), idle);

    // A main thread outranks idle and takes over as soon as it exists.
    let main = thread::create(
        testing::stack(512),
        PRIORITY_MAIN,
        CreateFlags::empty(),
        noop,
        core::ptr::null_mut(),
        "main",
    )
    .unwrap();
    assert_eq!(thread::getpid(), main);
    assert_eq!(thread::get_status(idle), Some(ThreadState::Pending));

    // A more urgent worker preempts main the same way.
    let worker = thread::create(
        testing::stack(512),
        PRIORITY_MAIN - 1,
        CreateFlags::empty(),
        noop,
        core::ptr::null_mut(),
        "worker",
    )
    .unwrap();
    assert_eq!(thread::getpid(), worker);

    // When the worker sleeps, main resumes; when it is woken, it
    // preempts again.
    thread::sleep();
    assert_eq!(thread::getpid(), main);
    thread::wakeup(worker).unwrap();
    assert_eq!(thread::getpid(), worker);
}

#[test]
fn equal_priorities_share_cooperatively() {
    let _t = testing::lock();
    mica_kernel::kernel::init(testing::stack(1024)).unwrap();

    let a = testing::create_thread(PRIORITY_MAIN, "a");
    let b = testing::create_thread(PRIORITY_MAIN, "b");
    let c = testing::create_thread(PRIORITY_MAIN, "c");
    assert_eq!(sched::run(), a);

    // Without a yield the runner keeps the CPU; each yield passes it on
    // in FIFO order around the level.
    thread::yield_higher();
    assert_eq!(thread::getpid(), a);

    thread::yield_now();
    assert_eq!(thread::getpid(), b);
    thread::yield_now();
    assert_eq!(thread::getpid(), c);
    thread::yield_now();
    assert_eq!(thread::getpid(), a);
}

#[test]
fn blocked_threads_leave_the_runqueue() {
    let _t = testing::lock();
    let idle = mica_kernel::kernel::init(testing::stack(1024)).unwrap();
    let solo = testing::create_thread(PRIORITY_MAIN, "solo");
    assert_eq!(sched::run(), solo);

    thread::sleep();
    assert_eq!(thread::get_status(solo), Some(ThreadState::Sleeping));
    assert_eq!(thread::getpid(), idle);
    assert_eq!(thread::get_status(idle), Some(ThreadState::Running));
    assert_eq!(thread::get(idle).unwrap().priority, PRIORITY_IDLE);
}

#[test]
fn wakeup_from_isr_is_honored_on_return() {
    let _t = testing::lock();
    let idle = mica_kernel::kernel::init(testing::stack(1024)).unwrap();
    let worker = testing::create_thread(PRIORITY_MAIN, "worker");
    assert_eq!(sched::run(), worker);

    thread::sleep();
    assert_eq!(thread::getpid(), idle);

    testing::in_isr(|| {
        thread::wakeup(worker).unwrap();
        // Inside the handler the idle thread is still current.
        assert_eq!(thread::getpid(), idle);
    });
    assert_eq!(thread::getpid(), worker);
}
