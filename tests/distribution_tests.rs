use fibersched::{Distribution, Fiber, QueueMode, Scheduler, SchedulerConfig};
use rstest::rstest;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[rstest]
fn test_every_policy_runs_all_tasks(
    #[values(Distribution::RoundRobin, Distribution::Random, Distribution::LeastLoaded)]
    distribution: Distribution,
    #[values(QueueMode::Sharded, QueueMode::Global)] queue_mode: QueueMode,
    #[values(true, false)] work_stealing: bool,
) {
    let mut config = SchedulerConfig::new("policy", 3)
        .with_distribution(distribution)
        .with_queue_mode(queue_mode);
    config.work_stealing = work_stealing;
    let scheduler = Scheduler::new(config);
    scheduler.start().expect("start failed");
    let done = Arc::new(AtomicUsize::new(0));

    for i in 0..300 {
        let done = done.clone();
        scheduler.schedule(move || {
            if i % 3 == 0 {
                Fiber::yield_to_ready();
            }
            done.fetch_add(1, Ordering::SeqCst);
        });
    }

    scheduler.stop().expect("Shutdown failed");
    assert_eq!(done.load(Ordering::SeqCst), 300);
}

#[rstest]
#[case::round_robin(Distribution::RoundRobin)]
#[case::least_loaded(Distribution::LeastLoaded)]
fn test_deterministic_policies_spread_work(#[case] distribution: Distribution) {
    let scheduler =
        Scheduler::new(SchedulerConfig::new("spread", 4).with_distribution(distribution));
    for _ in 0..40 {
        scheduler.schedule(|| {});
    }
    assert_eq!(scheduler.handle().queue_lengths(), vec![10, 10, 10, 10]);
}
