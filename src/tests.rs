//! Integration tests for the fiber scheduler.

use crate::{Distribution, Fiber, FiberState, Handle, QueueMode, Scheduler, SchedulerConfig, Task};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[test]
fn test_basic_task_execution() {
    let scheduler = Scheduler::new(SchedulerConfig::new("basic", 2));
    scheduler.start().expect("start failed");
    let value = Arc::new(AtomicUsize::new(0));
    let value_clone = value.clone();

    scheduler.schedule(move || {
        value_clone.store(42, Ordering::SeqCst);
    });

    scheduler.stop().expect("Shutdown failed");
    assert_eq!(value.load(Ordering::SeqCst), 42);
}

#[test]
fn test_parallel_task_execution() {
    let scheduler = Scheduler::new(SchedulerConfig::new("parallel", 4));
    scheduler.start().expect("start failed");
    let sum = Arc::new(AtomicUsize::new(0));

    let num_tasks = 100;
    let tasks = (0..num_tasks).map(|i| {
        let sum_clone = sum.clone();
        Task::new(move || {
            sum_clone.fetch_add(i, Ordering::SeqCst);
        })
    });
    scheduler.schedule_batch(tasks, None);

    scheduler.stop().expect("Shutdown failed");
    let expected_sum: usize = (0..num_tasks).sum();
    assert_eq!(sum.load(Ordering::SeqCst), expected_sum);
}

#[test]
fn test_high_throughput() {
    let scheduler = Scheduler::new(SchedulerConfig::new("throughput", 8));
    scheduler.start().expect("start failed");
    let completed = Arc::new(AtomicUsize::new(0));

    for _ in 0..1000 {
        let completed = completed.clone();
        scheduler.schedule(move || {
            let mut _sum = 0;
            for i in 0..100 {
                _sum += i;
            }
            completed.fetch_add(1, Ordering::Relaxed);
        });
    }

    scheduler.stop().expect("Shutdown failed");
    assert_eq!(completed.load(Ordering::SeqCst), 1000);
}

#[test]
fn test_yield_fairness() {
    // One worker and tasks queued before start: the interleaving is exact.
    let scheduler = Scheduler::new(SchedulerConfig::new("fairness", 1));
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

    for id in [1, 2] {
        let log = log.clone();
        scheduler.schedule(move || {
            for _ in 0..3 {
                log.lock().push(id);
                Fiber::yield_to_ready();
            }
        });
    }

    scheduler.start().expect("start failed");
    scheduler.stop().expect("Shutdown failed");

    assert_eq!(*log.lock(), vec![1, 2, 1, 2, 1, 2]);
}

#[test]
fn test_held_fiber_resumes_when_scheduled() {
    let scheduler = Scheduler::new(SchedulerConfig::new("hold", 2));
    scheduler.start().expect("start failed");
    let parked = Arc::new(parking_lot::Mutex::new(None));
    let resumed = Arc::new(AtomicBool::new(false));

    let parked_clone = parked.clone();
    let resumed_clone = resumed.clone();
    scheduler.schedule(move || {
        *parked_clone.lock() = Some(Fiber::current());
        Fiber::yield_to_hold();
        resumed_clone.store(true, Ordering::SeqCst);
    });

    let fiber = loop {
        if let Some(fiber) = parked.lock().take() {
            break fiber;
        }
        std::thread::yield_now();
    };
    while fiber.state() != FiberState::Hold {
        std::thread::yield_now();
    }
    assert!(!resumed.load(Ordering::SeqCst));

    scheduler.schedule_fiber(fiber);
    scheduler.stop().expect("Shutdown failed");
    assert!(resumed.load(Ordering::SeqCst));
}

#[test]
fn test_switch_to_moves_fiber() {
    let scheduler = Scheduler::new(SchedulerConfig::new("switch", 2));
    scheduler.start().expect("start failed");
    let observed = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let observed_clone = observed.clone();
    scheduler.schedule_to(
        move || {
            let id = Fiber::current_id();
            observed_clone.lock().push((Handle::worker_index(), id));
            let handle = Handle::current().expect("no scheduler");
            handle.switch_to(1);
            observed_clone.lock().push((Handle::worker_index(), Fiber::current_id()));
            // Already there: returns immediately.
            handle.switch_to(1);
            observed_clone.lock().push((Handle::worker_index(), Fiber::current_id()));
        },
        0,
    );

    scheduler.stop().expect("Shutdown failed");
    let observed = observed.lock();
    assert_eq!(observed.len(), 3);
    assert_eq!(observed[0].0, Some(0));
    assert_eq!(observed[1].0, Some(1));
    assert_eq!(observed[2].0, Some(1));
    assert!(observed.iter().all(|(_, id)| *id == observed[0].1));
}

#[test]
fn test_global_queue_mode_runs_everything() {
    let config = SchedulerConfig::new("global", 3)
        .with_queue_mode(QueueMode::Global)
        .with_distribution(Distribution::Random);
    let scheduler = Scheduler::new(config);
    scheduler.start().expect("start failed");
    let ran_on = Arc::new(parking_lot::Mutex::new(Vec::new()));

    for worker in 0..3 {
        let ran_on = ran_on.clone();
        scheduler.schedule_to(move || ran_on.lock().push((worker, Handle::worker_index())), worker);
    }
    scheduler.stop().expect("Shutdown failed");

    let mut ran_on = ran_on.lock().clone();
    ran_on.sort();
    assert_eq!(ran_on, vec![(0, Some(0)), (1, Some(1)), (2, Some(2))]);
}

#[test]
fn test_nested_scheduling_from_fiber() {
    let scheduler = Scheduler::new(SchedulerConfig::new("nested", 2));
    scheduler.start().expect("start failed");
    let leaves = Arc::new(AtomicUsize::new(0));

    let leaves_clone = leaves.clone();
    scheduler.schedule(move || {
        let handle = Handle::current().expect("no scheduler");
        for _ in 0..10 {
            let leaves = leaves_clone.clone();
            handle.schedule(move || {
                leaves.fetch_add(1, Ordering::SeqCst);
            });
        }
    });

    scheduler.stop().expect("Shutdown failed");
    assert_eq!(leaves.load(Ordering::SeqCst), 10);
}
