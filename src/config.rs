//! Externally supplied configuration consumed by the runtime.
//!
//! Both structs deserialize with `#[serde(default)]`, so a host
//! application can hand over a partial document (only the keys it cares
//! about) and keep the defaults for the rest.

use serde::{Deserialize, Serialize};

/// Configuration for fiber stacks and per-worker fiber recycling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FiberConfig {
    /// Stack size for each fiber in bytes. Default: 512KB.
    pub stack_size: usize,
    /// Fibers pre-allocated by each worker at startup. Default: 4.
    pub initial_pool_size: usize,
    /// Upper bound on terminated fibers a worker keeps for reuse. Default: 64.
    pub max_pooled: usize,
}

impl Default for FiberConfig {
    fn default() -> Self {
        Self {
            stack_size: 512 * 1024,
            initial_pool_size: 4,
            max_pooled: 64,
        }
    }
}

/// How unconstrained tasks are spread over the worker queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Distribution {
    /// Atomically incremented counter modulo the queue count.
    #[default]
    RoundRobin,
    /// Uniformly random queue.
    Random,
    /// Queue with the smallest length counter.
    LeastLoaded,
}

/// Queue topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QueueMode {
    /// One queue per worker.
    #[default]
    Sharded,
    /// A single queue shared by every worker.
    Global,
}

/// Strategy for pinning worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i -> logical processor i).
    Linear,
    /// Pin to physical cores only (even-numbered logical processors), avoiding SMT contention.
    AvoidSMT,
}

impl PinningStrategy {
    /// Logical core for `worker`, if this strategy pins at all.
    pub(crate) fn core_for(self, worker: usize, num_cores: usize) -> Option<usize> {
        if num_cores == 0 {
            return None;
        }
        match self {
            PinningStrategy::None => None,
            PinningStrategy::Linear => Some(worker % num_cores),
            PinningStrategy::AvoidSMT => {
                let physical = num_cores.div_ceil(2);
                Some((worker % physical) * 2)
            }
        }
    }
}

/// Configuration for a [`Scheduler`](crate::Scheduler).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Scheduler name, also the prefix of worker thread names.
    pub name: String,
    /// Total number of workers, including the caller when `use_caller` is set.
    pub worker_threads: usize,
    /// Whether the thread that starts the scheduler acts as worker 0.
    pub use_caller: bool,
    pub distribution: Distribution,
    pub queue_mode: QueueMode,
    /// Let idle workers take affinity-free tasks from the most loaded queue.
    pub work_stealing: bool,
    /// Maximum number of tasks moved by one steal.
    pub steal_batch: usize,
    /// Dispatches between two automatic load-balancing passes. 0 disables them.
    pub balance_interval: usize,
    pub pinning: PinningStrategy,
    pub fiber: FiberConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "fibersched".to_string(),
            worker_threads: num_cpus::get().max(1),
            use_caller: false,
            distribution: Distribution::default(),
            queue_mode: QueueMode::default(),
            work_stealing: true,
            steal_batch: 4,
            balance_interval: 256,
            pinning: PinningStrategy::default(),
            fiber: FiberConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Convenience constructor for a named scheduler with `worker_threads` workers.
    pub fn new(name: impl Into<String>, worker_threads: usize) -> Self {
        Self {
            name: name.into(),
            worker_threads: worker_threads.max(1),
            ..Default::default()
        }
    }

    pub fn with_use_caller(mut self, use_caller: bool) -> Self {
        self.use_caller = use_caller;
        self
    }

    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_queue_mode(mut self, queue_mode: QueueMode) -> Self {
        self.queue_mode = queue_mode;
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.fiber.stack_size = stack_size;
        self
    }

    /// Number of task queues implied by the queue mode.
    pub(crate) fn queue_count(&self) -> usize {
        match self.queue_mode {
            QueueMode::Sharded => self.worker_threads.max(1),
            QueueMode::Global => 1,
        }
    }
}
