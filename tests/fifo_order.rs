use fibersched::{Scheduler, SchedulerConfig, Task};
use std::sync::Arc;

#[test]
fn test_same_queue_runs_in_submission_order() {
    let scheduler = Scheduler::new(SchedulerConfig::new("fifo", 2));
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

    // Queued before start and pinned, so no steal can reorder them.
    for name in ["A", "B", "C", "D"] {
        let log = log.clone();
        scheduler.schedule_to(move || log.lock().push(name), 1);
    }
    scheduler.start().expect("start failed");
    scheduler.stop().expect("Shutdown failed");

    assert_eq!(*log.lock(), vec!["A", "B", "C", "D"]);
}

#[test]
fn test_batch_keeps_order_on_one_worker() {
    let mut config = SchedulerConfig::new("fifo-batch", 2);
    config.work_stealing = false;
    config.balance_interval = 0;
    let scheduler = Scheduler::new(config);
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let tasks = (0..16).map(|i| {
        let log = log.clone();
        Task::new(move || log.lock().push(i))
    });
    scheduler.schedule_batch(tasks, Some(0));
    scheduler.start().expect("start failed");
    scheduler.stop().expect("Shutdown failed");

    assert_eq!(*log.lock(), (0..16).collect::<Vec<_>>());
}
