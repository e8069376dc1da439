use fibersched::{
    Distribution, FiberConfig, PinningStrategy, QueueMode, Scheduler, SchedulerConfig,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn test_fiber_config_defaults() {
    let config = FiberConfig::default();
    assert_eq!(config.stack_size, 512 * 1024); // 512KB
    assert_eq!(config.initial_pool_size, 4);
    assert_eq!(config.max_pooled, 64);
}

#[test]
fn test_scheduler_config_defaults() {
    let config = SchedulerConfig::default();
    assert_eq!(config.worker_threads, num_cpus::get().max(1));
    assert!(!config.use_caller);
    assert_eq!(config.distribution, Distribution::RoundRobin);
    assert_eq!(config.queue_mode, QueueMode::Sharded);
    assert_eq!(config.pinning, PinningStrategy::None);
}

#[test]
fn test_partial_document_keeps_defaults() -> anyhow::Result<()> {
    let config: SchedulerConfig = serde_json::from_str(
        r#"{ "name": "io", "worker_threads": 3, "fiber": { "stack_size": 131072 } }"#,
    )?;
    assert_eq!(config.name, "io");
    assert_eq!(config.worker_threads, 3);
    assert_eq!(config.fiber.stack_size, 128 * 1024);
    assert_eq!(config.fiber.max_pooled, FiberConfig::default().max_pooled);
    assert!(config.work_stealing);
    Ok(())
}

#[test]
fn test_scheduler_with_custom_fiber_config() {
    let mut config = SchedulerConfig::new("custom", 2).with_stack_size(64 * 1024);
    config.fiber.initial_pool_size = 0;
    config.fiber.max_pooled = 2;
    let scheduler = Scheduler::new(config);
    scheduler.start().expect("start failed");

    let stack_sizes = Arc::new(AtomicUsize::new(usize::MAX));
    for _ in 0..20 {
        let stack_sizes = stack_sizes.clone();
        scheduler.schedule(move || {
            let size = fibersched::Fiber::current().stack_size();
            stack_sizes.fetch_min(size, Ordering::SeqCst);
        });
    }
    scheduler.stop().expect("Shutdown failed");
    assert!(stack_sizes.load(Ordering::SeqCst) >= 64 * 1024);
}

#[test]
fn test_zero_workers_is_clamped() {
    let mut config = SchedulerConfig::default();
    config.worker_threads = 0;
    let scheduler = Scheduler::new(config);
    assert_eq!(scheduler.num_workers(), 1);
}
