use fibersched::{Fiber, Handle, Mutex, Parker, Scheduler, SchedulerConfig, Task};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("fibersched - Stackful Fibers on a Multi-Worker Scheduler\n");

    // 4 workers; the main thread is worker 0 and joins in from `stop`.
    let num_threads = 4;
    let config = SchedulerConfig::new("demo", num_threads).with_use_caller(true);
    let scheduler = Scheduler::with_hooks(config, Arc::new(Parker::default()));
    if let Err(err) = scheduler.start() {
        eprintln!("Failed to start scheduler: {err}");
        return;
    }
    println!("Started scheduler with {num_threads} workers\n");

    // Example 1: Simple task execution
    println!("Example 1: Simple task execution");
    scheduler.schedule_to(
        || {
            println!(
                "  Hello from fiber {} on worker {:?}",
                Fiber::current_id(),
                Handle::worker_index()
            )
        },
        1,
    );

    // Example 2: Parallel computation
    println!("Example 2: Parallel computation (results printed after stop)");
    let sum = Arc::new(AtomicUsize::new(0));
    let num_tasks = 100;
    let tasks = (0..num_tasks).map(|i| {
        let sum_clone = sum.clone();
        Task::new(move || {
            let mut _local_sum = 0;
            for j in 0..1000 {
                _local_sum += j;
            }
            sum_clone.fetch_add(i, Ordering::SeqCst);
        })
    });
    scheduler.schedule_batch(tasks, None);

    // Example 3: Fibers contending on a fiber-aware mutex
    println!("Example 3: Fiber-aware mutex");
    let shared = Arc::new(Mutex::new(0usize));
    for _ in 0..64 {
        let shared = shared.clone();
        scheduler.schedule(move || {
            for _ in 0..10 {
                *shared.lock() += 1;
                Fiber::yield_to_ready();
            }
        });
    }

    // Example 4: High-throughput run
    println!("Example 4: High-throughput run\n");
    let num_small = 10_000;
    let start = Instant::now();
    let tasks = (0..num_small).map(|_| {
        Task::new(|| {
            let mut _x = 0;
            for i in 0..10 {
                _x += i;
            }
        })
    });
    scheduler.schedule_batch(tasks, None);

    println!("Stopping scheduler...");
    if let Err(err) = scheduler.stop() {
        eprintln!("Shutdown error: {err}");
    }
    let duration = start.elapsed();

    let expected_sum: usize = (0..num_tasks).sum();
    println!("  Sum result: {} (expected: {})", sum.load(Ordering::SeqCst), expected_sum);
    println!("  Mutex counter: {} (expected: {})", *shared.lock(), 64 * 10);
    println!(
        "  Drained {} tasks in {:?} ({:.2} tasks/second)",
        num_small,
        duration,
        num_small as f64 / duration.as_secs_f64()
    );
    println!("Done!");
}
