use fibersched::{Fiber, Handle, Scheduler, SchedulerConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn test_cooperative_yielding() {
    let scheduler = Scheduler::new(SchedulerConfig::new("yield", 2));
    scheduler.start().expect("start failed");
    let iterations_completed = Arc::new(AtomicUsize::new(0));
    let other_task_ran = Arc::new(AtomicUsize::new(0));

    let iterations = iterations_completed.clone();
    scheduler.schedule(move || {
        for i in 0..100 {
            iterations.fetch_add(1, Ordering::SeqCst);

            if i % 10 == 0 {
                Fiber::yield_to_ready();
            }
        }
    });

    let other = other_task_ran.clone();
    scheduler.schedule(move || {
        other.fetch_add(1, Ordering::SeqCst);
    });

    scheduler.stop().expect("Shutdown failed");
    assert_eq!(iterations_completed.load(Ordering::SeqCst), 100);
    assert_eq!(other_task_ran.load(Ordering::SeqCst), 1);
}

#[test]
fn test_yield_lets_same_worker_make_progress() {
    // A single worker: the spinner only finishes because the setter gets
    // to run while it yields.
    let scheduler = Scheduler::new(SchedulerConfig::new("progress", 1));
    scheduler.start().expect("start failed");
    let flag = Arc::new(AtomicUsize::new(0));

    let spinner_flag = flag.clone();
    scheduler.schedule(move || {
        while spinner_flag.load(Ordering::SeqCst) == 0 {
            Fiber::yield_to_ready();
        }
        assert_eq!(Handle::worker_index(), Some(0));
    });
    let setter_flag = flag.clone();
    scheduler.schedule(move || setter_flag.store(1, Ordering::SeqCst));

    scheduler.stop().expect("Shutdown failed");
    assert_eq!(flag.load(Ordering::SeqCst), 1);
}
