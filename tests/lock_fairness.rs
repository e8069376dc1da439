use fibersched::{Mutex, Scheduler, SchedulerConfig, Semaphore};
use std::sync::Arc;

const WAITERS: usize = 8;

#[test]
fn test_mutex_hands_off_in_lock_order() {
    // One worker queues the waiters in submission order.
    let scheduler = Scheduler::new(SchedulerConfig::new("fair-mutex", 1));
    scheduler.start().expect("start failed");
    let mutex = Arc::new(Mutex::new(Vec::new()));

    let held = mutex.lock();
    for i in 0..WAITERS {
        let mutex = mutex.clone();
        scheduler.schedule(move || mutex.lock().push(i));
    }
    while mutex.waiters() < WAITERS {
        std::thread::yield_now();
    }
    drop(held);

    scheduler.stop().expect("Shutdown failed");
    let order = mutex.lock().clone();
    assert_eq!(order, (0..WAITERS).collect::<Vec<_>>());
    assert!(!mutex.is_locked());
}

#[test]
fn test_semaphore_wakes_in_wait_order() {
    let scheduler = Scheduler::new(SchedulerConfig::new("fair-sem", 1));
    scheduler.start().expect("start failed");
    let semaphore = Arc::new(Semaphore::new(0));
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    for i in 0..WAITERS {
        let semaphore = semaphore.clone();
        let order = order.clone();
        scheduler.schedule(move || {
            semaphore.wait();
            order.lock().push(i);
        });
    }
    while semaphore.waiters() < WAITERS {
        std::thread::yield_now();
    }
    for _ in 0..WAITERS {
        semaphore.notify();
    }

    scheduler.stop().expect("Shutdown failed");
    assert_eq!(*order.lock(), (0..WAITERS).collect::<Vec<_>>());
}
