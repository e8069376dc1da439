//! Worker thread implementation.
//!
//! Each worker repeatedly pulls a task from its queue (stealing from the
//! busiest peer when its own is empty), binds closure tasks to a pooled
//! fiber, and resumes the fiber from its scheduling fiber. Fibers that yield
//! Ready are requeued; fibers that yield Hold belong to whoever will wake
//! them.

use crate::config::PinningStrategy;
use crate::fiber::FiberState;
use crate::fiber_pool::FiberPool;
use crate::scheduler::{Handle, Shared, WorkerContext, record};
use crate::task::{Task, Work};
use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

/// Spawns the OS thread for worker `index`, named `{scheduler}-{index}`.
pub(crate) fn spawn(handle: Handle, index: usize) -> io::Result<JoinHandle<()>> {
    let name = format!("{}-{}", handle.name(), index);
    let pinning = handle.config().pinning;
    thread::Builder::new().name(name).spawn(move || {
        pin_current_thread(pinning, index);
        run_loop(handle, index);
    })
}

fn pin_current_thread(strategy: PinningStrategy, index: usize) {
    if strategy == PinningStrategy::None {
        return;
    }
    let Some(core_ids) = core_affinity::get_core_ids() else {
        tracing::warn!(worker = index, "core ids unavailable, worker left unpinned");
        return;
    };
    if let Some(core) = strategy.core_for(index, core_ids.len()) {
        if !core_affinity::set_for_current(core_ids[core]) {
            tracing::warn!(worker = index, core, "failed to pin worker");
        }
    }
}

/// Main execution loop of worker `index`. Runs on the worker's scheduling
/// fiber until the scheduler is stopping and every queue is drained.
pub(crate) fn run_loop(handle: Handle, index: usize) {
    let _context = WorkerContext::enter(&handle, index);
    let shared = Arc::clone(&handle.shared);
    let fiber_config = &shared.config.fiber;
    let mut pool = FiberPool::new(
        fiber_config.initial_pool_size,
        fiber_config.stack_size,
        fiber_config.max_pooled,
    );

    shared.hooks.on_worker_start(index);
    tracing::debug!(scheduler = %handle.name(), worker = index, "worker started");

    loop {
        match next_task(&shared, index) {
            Some(task) => {
                shared.active_workers.fetch_add(1, Ordering::SeqCst);
                dispatch(&handle, index, task, &mut pool);
                shared.active_workers.fetch_sub(1, Ordering::SeqCst);
                // A Ready fiber was already requeued and counted again.
                shared.pending.fetch_sub(1, Ordering::SeqCst);
                if shared.balance_due() {
                    handle.auto_load_balance();
                }
            }
            None => {
                if shared.can_exit() {
                    break;
                }
                shared.idle_workers.fetch_add(1, Ordering::SeqCst);
                record!(shared, idle_calls);
                shared.hooks.idle(index);
                shared.idle_workers.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    shared.hooks.on_worker_stop(index);
    tracing::debug!(
        scheduler = %handle.name(),
        worker = index,
        pooled = pool.len(),
        "worker stopped"
    );
}

fn next_task(shared: &Shared, index: usize) -> Option<Task> {
    let pop = shared.queues[shared.home_queue(index)].pop_for(index);
    if pop.skipped_pinned {
        // Whoever owns the passed-over tasks may be asleep.
        shared.hooks.tickle(None);
    }
    pop.task.or_else(|| {
        if shared.config.work_stealing {
            steal(shared, index)
        } else {
            None
        }
    })
}

/// Takes a batch of unpinned tasks from the longest peer queue, keeps the
/// first and moves the rest onto this worker's queue.
fn steal(shared: &Shared, index: usize) -> Option<Task> {
    if shared.queues.len() < 2 {
        return None;
    }
    let (victim, len) = shared
        .queues
        .iter()
        .enumerate()
        .filter(|(queue, _)| *queue != index)
        .map(|(queue, tasks)| (queue, tasks.len()))
        .max_by_key(|(_, len)| *len)?;
    if len == 0 {
        return None;
    }

    let mut stolen = shared.queues[victim]
        .steal_unpinned(shared.config.steal_batch.max(1))
        .into_iter();
    let first = stolen.next()?;
    let rest: Vec<Task> = stolen.collect();
    record!(shared, steals);
    record!(shared, stolen_tasks, rest.len() + 1);
    tracing::trace!(worker = index, victim, count = rest.len() + 1, "stole tasks");
    if !rest.is_empty() {
        shared.queues[index].push_batch(rest);
    }
    Some(first)
}

fn dispatch(handle: &Handle, index: usize, task: Task, pool: &mut FiberPool) {
    let (work, affinity) = task.into_parts();
    let fiber = match work {
        Work::Fiber(fiber) => fiber,
        Work::Func(entry) => match pool.get(entry) {
            Ok(fiber) => fiber,
            Err(err) => {
                tracing::error!(worker = index, %err, "no fiber for task, dropping it");
                return;
            }
        },
    };
    if fiber.state().is_finished() {
        tracing::warn!(worker = index, fiber_id = fiber.id(), "skipping finished fiber");
        return;
    }

    record!(handle.shared, tasks_dispatched);
    match fiber.swap_in() {
        FiberState::Ready => {
            record!(handle.shared, fibers_requeued);
            handle.schedule_task(Task::resume(fiber).with_affinity(affinity));
        }
        state @ (FiberState::Term | FiberState::Except) => {
            if state == FiberState::Except {
                record!(handle.shared, tasks_failed);
            }
            record!(handle.shared, tasks_completed);
            pool.recycle(fiber);
        }
        // Hold: the fiber parked itself; its waker reschedules it.
        _ => {}
    }
}
