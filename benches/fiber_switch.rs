//! Fiber switch latency benchmark using criterion.
//!
//! Measures the raw context-switch cost through the fiber API directly,
//! bypassing every scheduler cost (queueing, dispatch, stealing).

use criterion::{Criterion, criterion_group, criterion_main};
use fibersched::{Fiber, FiberPool, FiberState, Scheduler, SchedulerConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const STACK_SIZE: usize = 128 * 1024;

/// Round trip into a long-lived fiber and back out: Caller -> Fiber -> Caller.
fn bench_yield_round_trip(c: &mut Criterion) {
    let done = Arc::new(AtomicBool::new(false));
    let done_clone = done.clone();
    let fiber = Fiber::new(STACK_SIZE, move || {
        while !done_clone.load(Ordering::Relaxed) {
            Fiber::yield_to_ready();
        }
    })
    .expect("fiber allocation failed");

    // Warmup
    for _ in 0..1000 {
        fiber.swap_in();
    }

    c.bench_function("yield_round_trip", |b| {
        b.iter(|| std::hint::black_box(fiber.swap_in()))
    });

    done.store(true, Ordering::Relaxed);
    while fiber.swap_in() != FiberState::Term {}
}

/// Re-arm a finished fiber and run it to completion, reusing its stack.
fn bench_reset_and_run(c: &mut Criterion) {
    let fiber = Fiber::new(STACK_SIZE, || {}).expect("fiber allocation failed");
    fiber.swap_in();

    c.bench_function("reset_and_run", |b| {
        b.iter(|| {
            fiber
                .reset(|| {
                    std::hint::black_box(42);
                })
                .expect("reset failed");
            fiber.swap_in()
        })
    });
}

/// Bind a closure through a worker-style pool and recycle the fiber.
fn bench_pool_get_recycle(c: &mut Criterion) {
    let mut pool = FiberPool::new(4, STACK_SIZE, 16);

    c.bench_function("pool_get_recycle", |b| {
        b.iter(|| {
            let fiber = pool
                .get(Box::new(|| {
                    std::hint::black_box(42);
                }))
                .expect("pool exhausted");
            fiber.swap_in();
            pool.recycle(fiber)
        })
    });
}

/// Fresh fiber per run, for comparison with the reuse paths.
fn bench_create_and_run(c: &mut Criterion) {
    c.bench_function("create_and_run", |b| {
        b.iter(|| {
            let fiber = Fiber::new(STACK_SIZE, || {}).expect("fiber allocation failed");
            fiber.swap_in()
        })
    });
}

/// Schedule-to-completion through a single-worker scheduler.
fn bench_scheduler_round_trip(c: &mut Criterion) {
    c.bench_function("scheduler_100_tasks", |b| {
        b.iter(|| {
            let scheduler = Scheduler::new(SchedulerConfig::new("bench", 1));
            for _ in 0..100 {
                scheduler.schedule(std::hint::black_box(|| {}));
            }
            scheduler.start().expect("start failed");
            scheduler.stop().expect("stop failed");
        })
    });
}

criterion_group!(
    benches,
    bench_yield_round_trip,
    bench_reset_and_run,
    bench_pool_get_recycle,
    bench_create_and_run,
    bench_scheduler_round_trip
);
criterion_main!(benches);
