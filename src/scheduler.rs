//! Multi-worker fiber scheduler.
//!
//! The [`Scheduler`] owns a fixed set of workers, one FIFO task queue per
//! worker (or a single shared queue in [`QueueMode::Global`]), and the
//! policy that spreads unconstrained tasks over those queues. Collaborators
//! (wait queues, an I/O reactor, fibers themselves) talk to it through the
//! cheap, cloneable [`Handle`].

use crate::config::{Distribution, QueueMode, SchedulerConfig};
use crate::error::{SchedulerError, invariant_violation};
use crate::fiber::{Fiber, FiberKind};
use crate::hooks::{DefaultHooks, SchedulerHooks};
use crate::queue::TaskQueue;
use crate::task::Task;
use crate::worker;
use parking_lot::Mutex;
use rand::Rng;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{JoinHandle, ThreadId};

#[cfg(feature = "metrics")]
use crate::metrics::{Metrics, MetricsSnapshot};

/// Queue length difference above which a balancing pass moves tasks.
pub const BALANCE_THRESHOLD: usize = 10;
/// Maximum number of tasks moved by one balancing pass.
pub const BALANCE_BATCH: usize = 8;

macro_rules! record {
    ($shared:expr, $field:ident) => {
        record!($shared, $field, 1)
    };
    ($shared:expr, $field:ident, $count:expr) => {{
        #[cfg(feature = "metrics")]
        $shared
            .metrics
            .$field
            .fetch_add($count as u64, std::sync::atomic::Ordering::Relaxed);
        #[cfg(not(feature = "metrics"))]
        let _ = (&$shared, $count);
    }};
}
pub(crate) use record;

thread_local! {
    static CURRENT_SCHEDULER: RefCell<Option<Handle>> = const { RefCell::new(None) };
    static WORKER_INDEX: Cell<Option<usize>> = const { Cell::new(None) };
    static SCHEDULING_FIBER: RefCell<Option<Arc<Fiber>>> = const { RefCell::new(None) };
}

pub(crate) struct Shared {
    pub(crate) config: SchedulerConfig,
    pub(crate) queues: Vec<TaskQueue>,
    pub(crate) hooks: Arc<dyn SchedulerHooks>,
    round_robin: AtomicUsize,
    dispatches: AtomicUsize,
    /// Workers holding a task they popped but have not finished dispatching.
    pub(crate) active_workers: AtomicUsize,
    /// Tasks queued or being dispatched. Raised before a push, lowered only
    /// after the dispatch (and any requeue it caused) is done.
    pub(crate) pending: AtomicUsize,
    pub(crate) idle_workers: AtomicUsize,
    stopping: AtomicBool,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Metrics,
}

impl Shared {
    /// Queue a worker pops from first.
    pub(crate) fn home_queue(&self, worker: usize) -> usize {
        match self.config.queue_mode {
            QueueMode::Sharded => worker,
            QueueMode::Global => 0,
        }
    }

    /// A worker may leave its loop once stop was requested and no task is
    /// queued or mid-dispatch anywhere.
    pub(crate) fn can_exit(&self) -> bool {
        self.stopping.load(Ordering::SeqCst) && self.pending.load(Ordering::SeqCst) == 0
    }

    /// Counts one dispatch; true when a balancing pass is due.
    pub(crate) fn balance_due(&self) -> bool {
        let interval = self.config.balance_interval;
        interval > 0 && self.dispatches.fetch_add(1, Ordering::Relaxed) % interval == interval - 1
    }
}

/// Cloneable reference to a running scheduler.
#[derive(Clone)]
pub struct Handle {
    pub(crate) shared: Arc<Shared>,
}

impl Handle {
    /// Scheduler driving the current thread, if any.
    pub fn current() -> Option<Handle> {
        CURRENT_SCHEDULER
            .try_with(|current| current.borrow().clone())
            .ok()
            .flatten()
    }

    /// Index of the worker running on the current thread, if any.
    pub fn worker_index() -> Option<usize> {
        WORKER_INDEX.try_with(Cell::get).ok().flatten()
    }

    /// Scheduling fiber of the current worker thread, if any.
    pub fn scheduling_fiber() -> Option<Arc<Fiber>> {
        SCHEDULING_FIBER
            .try_with(|fiber| fiber.borrow().clone())
            .ok()
            .flatten()
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Returns the number of workers.
    pub fn worker_count(&self) -> usize {
        self.shared.config.worker_threads
    }

    /// Returns the number of workers currently dispatching a task.
    pub fn active_workers(&self) -> usize {
        self.shared.active_workers.load(Ordering::Relaxed)
    }

    /// Returns the number of workers currently inside the idle hook.
    pub fn idle_workers(&self) -> usize {
        self.shared.idle_workers.load(Ordering::Relaxed)
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::SeqCst)
    }

    /// Snapshot of every queue's length counter.
    pub fn queue_lengths(&self) -> Vec<usize> {
        self.shared.queues.iter().map(TaskQueue::len).collect()
    }

    pub fn same_scheduler(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Submits a closure to run on any worker.
    pub fn schedule<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_task(Task::new(work));
    }

    /// Submits a closure that must run on worker `worker`.
    pub fn schedule_to<F>(&self, work: F, worker: usize)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_task(Task::new(work).with_affinity(Some(worker)));
    }

    /// Resumes a suspended fiber on any worker.
    pub fn schedule_fiber(&self, fiber: Arc<Fiber>) {
        self.schedule_task(Task::resume(fiber));
    }

    /// Resumes a suspended fiber on worker `worker`.
    pub fn schedule_fiber_to(&self, fiber: Arc<Fiber>, worker: usize) {
        self.schedule_task(Task::resume(fiber).with_affinity(Some(worker)));
    }

    /// Queues a task, honouring its affinity, and tickles if the target
    /// queue was empty.
    pub fn schedule_task(&self, task: Task) {
        let affinity = task.affinity();
        self.check_affinity(affinity);
        let index = self.pick_queue(affinity);
        tracing::trace!(scheduler = %self.name(), queue = index, ?task, "schedule");
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if self.shared.queues[index].push(task) {
            self.tickle(index, affinity);
        }
    }

    /// Queues a batch of tasks. With `worker` set, every task is pinned to
    /// that worker; otherwise one queue is chosen for the whole batch and
    /// tasks keep their own affinity only when it matches that choice.
    pub fn schedule_batch<I>(&self, tasks: I, worker: Option<usize>)
    where
        I: IntoIterator<Item = Task>,
    {
        self.check_affinity(worker);
        let index = self.pick_queue(worker);
        let mut batch = Vec::new();
        for task in tasks {
            if worker.is_some() {
                batch.push(task.with_affinity(worker));
                continue;
            }
            match task.affinity() {
                // Pinned elsewhere: route it on its own.
                Some(pinned) if self.shared.home_queue(pinned) != index => {
                    self.schedule_task(task)
                }
                pinned => {
                    self.check_affinity(pinned);
                    batch.push(task);
                }
            }
        }
        self.shared.pending.fetch_add(batch.len(), Ordering::SeqCst);
        if self.shared.queues[index].push_batch(batch) {
            self.tickle(index, worker);
        }
    }

    /// Moves the rest of the current fiber onto worker `worker`.
    ///
    /// Returns immediately when already running there.
    pub fn switch_to(&self, worker: usize) {
        self.check_affinity(Some(worker));
        if Handle::current().is_some_and(|current| current.same_scheduler(self))
            && Handle::worker_index() == Some(worker)
        {
            return;
        }
        let Some(fiber) = Fiber::try_current().filter(|f| f.kind() == FiberKind::Task) else {
            invariant_violation("switch_to called outside of a task fiber");
        };
        tracing::trace!(scheduler = %self.name(), fiber_id = fiber.id(), worker, "switch_to");
        self.schedule_task(Task::resume(fiber).with_affinity(Some(worker)));
        Fiber::yield_to_hold();
    }

    /// Moves a small batch of unpinned tasks from the longest queue to the
    /// shortest one when their lengths differ by more than
    /// [`BALANCE_THRESHOLD`]. Returns the number of tasks moved.
    pub fn auto_load_balance(&self) -> usize {
        let queues = &self.shared.queues;
        if queues.len() < 2 {
            return 0;
        }
        let lengths: Vec<usize> = queues.iter().map(TaskQueue::len).collect();
        let Some((max_index, &max_len)) = lengths.iter().enumerate().max_by_key(|(_, len)| **len)
        else {
            return 0;
        };
        let Some((min_index, &min_len)) = lengths.iter().enumerate().min_by_key(|(_, len)| **len)
        else {
            return 0;
        };
        let diff = max_len.saturating_sub(min_len);
        if diff <= BALANCE_THRESHOLD {
            return 0;
        }

        let moved = queues[max_index].take_unpinned_tail(BALANCE_BATCH.min(diff / 2));
        let count = moved.len();
        if count > 0 {
            if queues[min_index].push_batch(moved) {
                self.tickle(min_index, None);
            }
            record!(self.shared, balanced_tasks, count);
            tracing::debug!(
                scheduler = %self.name(),
                from = max_index,
                to = min_index,
                count,
                "rebalanced queues"
            );
        }
        count
    }

    fn check_affinity(&self, worker: Option<usize>) {
        if let Some(worker) = worker {
            assert!(
                worker < self.worker_count(),
                "worker index {worker} out of range for scheduler `{}` with {} workers",
                self.name(),
                self.worker_count()
            );
        }
    }

    fn pick_queue(&self, affinity: Option<usize>) -> usize {
        let count = self.shared.queues.len();
        if count == 1 {
            return 0;
        }
        if let Some(worker) = affinity {
            return self.shared.home_queue(worker);
        }
        match self.shared.config.distribution {
            Distribution::RoundRobin => {
                self.shared.round_robin.fetch_add(1, Ordering::Relaxed) % count
            }
            Distribution::Random => rand::thread_rng().gen_range(0..count),
            Distribution::LeastLoaded => self
                .shared
                .queues
                .iter()
                .enumerate()
                .min_by_key(|(_, queue)| queue.len())
                .map_or(0, |(index, _)| index),
        }
    }

    pub(crate) fn tickle(&self, queue: usize, affinity: Option<usize>) {
        let target = match self.shared.config.queue_mode {
            QueueMode::Sharded => Some(queue),
            QueueMode::Global => affinity,
        };
        record!(self.shared, tickles);
        self.shared.hooks.tickle(target);
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("name", &self.name())
            .field("workers", &self.worker_count())
            .field("queues", &self.queue_lengths())
            .finish()
    }
}

/// Installs the scheduler context of a worker thread for the lifetime of
/// the guard and restores the previous one on drop.
pub(crate) struct WorkerContext {
    previous_scheduler: Option<Handle>,
    previous_index: Option<usize>,
    previous_fiber: Option<Arc<Fiber>>,
}

impl WorkerContext {
    pub(crate) fn enter(handle: &Handle, index: usize) -> Self {
        let previous_scheduler =
            CURRENT_SCHEDULER.with(|current| current.borrow_mut().replace(handle.clone()));
        let previous_index = WORKER_INDEX.replace(Some(index));
        let previous_fiber =
            SCHEDULING_FIBER.with(|fiber| fiber.borrow_mut().replace(Fiber::current()));
        WorkerContext {
            previous_scheduler,
            previous_index,
            previous_fiber,
        }
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        let scheduler = self.previous_scheduler.take();
        let fiber = self.previous_fiber.take();
        let _ = CURRENT_SCHEDULER.try_with(|current| *current.borrow_mut() = scheduler);
        let _ = WORKER_INDEX.try_with(|index| index.set(self.previous_index));
        let _ = SCHEDULING_FIBER.try_with(|slot| *slot.borrow_mut() = fiber);
    }
}

/// Owns the workers of a scheduler. Dropping a started scheduler stops it.
///
/// # Example
///
/// ```no_run
/// use fibersched::{Scheduler, SchedulerConfig};
///
/// let scheduler = Scheduler::new(SchedulerConfig::new("demo", 4));
/// scheduler.start().unwrap();
/// scheduler.schedule(|| println!("Hello from a fiber!"));
/// scheduler.stop().unwrap();
/// ```
pub struct Scheduler {
    handle: Handle,
    threads: Mutex<Vec<JoinHandle<()>>>,
    caller_fiber: Mutex<Option<Arc<Fiber>>>,
    caller_thread: Mutex<Option<ThreadId>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Scheduler {
    /// Creates a stopped scheduler with the default hooks.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_hooks(config, Arc::new(DefaultHooks))
    }

    /// Creates a stopped scheduler whose tickle/idle behaviour comes from `hooks`.
    pub fn with_hooks(mut config: SchedulerConfig, hooks: Arc<dyn SchedulerHooks>) -> Self {
        config.worker_threads = config.worker_threads.max(1);
        let queues = (0..config.queue_count()).map(|_| TaskQueue::new()).collect();
        let shared = Arc::new(Shared {
            config,
            queues,
            hooks,
            round_robin: AtomicUsize::new(0),
            dispatches: AtomicUsize::new(0),
            active_workers: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            idle_workers: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            #[cfg(feature = "metrics")]
            metrics: Metrics::new(),
        });
        Scheduler {
            handle: Handle { shared },
            threads: Mutex::new(Vec::new()),
            caller_fiber: Mutex::new(None),
            caller_thread: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Creates a scheduler with one worker per CPU core.
    pub fn with_default_threads(name: impl Into<String>) -> Self {
        Self::new(SchedulerConfig::new(name, num_cpus::get()))
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Returns the number of workers.
    pub fn num_workers(&self) -> usize {
        self.handle.worker_count()
    }

    /// Spawns the worker threads. With `use_caller`, worker 0 is the calling
    /// thread, which joins in from [`stop`](Self::stop).
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStarted(self.name().to_string()));
        }
        let config = &self.handle.shared.config;

        let first_spawned = if config.use_caller {
            let handle = self.handle.clone();
            let fiber = Fiber::create(
                config.fiber.stack_size,
                Box::new(move || worker::run_loop(handle, 0)),
                true,
            )?;
            *self.caller_fiber.lock() = Some(fiber);
            *self.caller_thread.lock() = Some(std::thread::current().id());
            let handle = self.handle.clone();
            CURRENT_SCHEDULER.with(|current| *current.borrow_mut() = Some(handle));
            1
        } else {
            0
        };

        let mut threads = self.threads.lock();
        for index in first_spawned..config.worker_threads {
            let thread = worker::spawn(self.handle.clone(), index)
                .map_err(|source| SchedulerError::Spawn { index, source })?;
            threads.push(thread);
        }

        tracing::info!(
            scheduler = %self.name(),
            workers = config.worker_threads,
            use_caller = config.use_caller,
            distribution = ?config.distribution,
            queue_mode = ?config.queue_mode,
            "scheduler started"
        );
        Ok(())
    }

    /// Stops the scheduler: drains every queue, then joins the workers.
    ///
    /// Idempotent. With `use_caller` the calling thread runs worker 0's loop
    /// until the queues are drained.
    pub fn stop(&self) -> Result<(), SchedulerError> {
        if !self.started.load(Ordering::SeqCst) || self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if Handle::current().is_some_and(|current| current.same_scheduler(&self.handle))
            && Handle::worker_index().is_some()
        {
            invariant_violation("scheduler stopped from one of its own workers");
        }

        let shared = &self.handle.shared;
        shared.stopping.store(true, Ordering::SeqCst);
        for worker in 0..shared.config.worker_threads {
            self.handle
                .schedule_task(Task::new(|| {}).with_affinity(Some(worker)));
            shared.hooks.tickle(Some(worker));
        }

        let caller_fiber = self.caller_fiber.lock().take();
        if let Some(fiber) = caller_fiber {
            let caller = *self.caller_thread.lock();
            if caller != Some(std::thread::current().id()) {
                tracing::warn!(
                    scheduler = %self.name(),
                    "stop called off the creating thread; worker 0 runs here instead"
                );
            }
            if !fiber.state().is_finished() {
                fiber.call();
            }
        }

        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        let mut panicked = 0;
        for thread in threads {
            let name = thread.thread().name().unwrap_or("<unnamed>").to_string();
            if thread.join().is_err() {
                panicked += 1;
                tracing::error!(scheduler = %self.name(), thread = %name, "worker thread panicked");
            }
        }

        let _ = CURRENT_SCHEDULER.try_with(|current| {
            let mut current = current.borrow_mut();
            if current
                .as_ref()
                .is_some_and(|handle| handle.same_scheduler(&self.handle))
            {
                *current = None;
            }
        });

        tracing::info!(scheduler = %self.name(), "scheduler stopped");
        if panicked > 0 {
            Err(SchedulerError::WorkerPanicked(panicked))
        } else {
            Ok(())
        }
    }

    /// Submits a closure to run on any worker.
    pub fn schedule<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.schedule(work);
    }

    /// Submits a closure that must run on worker `worker`.
    pub fn schedule_to<F>(&self, work: F, worker: usize)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.schedule_to(work, worker);
    }

    pub fn schedule_fiber(&self, fiber: Arc<Fiber>) {
        self.handle.schedule_fiber(fiber);
    }

    pub fn schedule_batch<I>(&self, tasks: I, worker: Option<usize>)
    where
        I: IntoIterator<Item = Task>,
    {
        self.handle.schedule_batch(tasks, worker);
    }

    pub fn auto_load_balance(&self) -> usize {
        self.handle.auto_load_balance()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::error!(scheduler = %self.name(), %err, "scheduler stop failed during drop");
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("handle", &self.handle)
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}
