#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "metrics")]
use std::time::Instant;

/// Optional runtime counters for a scheduler.
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct Metrics {
    /// Fiber resumptions performed by workers.
    pub tasks_dispatched: AtomicU64,
    /// Fibers that ran to completion (including those that panicked).
    pub tasks_completed: AtomicU64,
    /// Fibers whose entry panicked.
    pub tasks_failed: AtomicU64,
    /// Fibers that yielded Ready and went back onto a queue.
    pub fibers_requeued: AtomicU64,
    /// Successful steal operations.
    pub steals: AtomicU64,
    /// Tasks moved by those steals.
    pub stolen_tasks: AtomicU64,
    /// Tasks moved by load-balancing passes.
    pub balanced_tasks: AtomicU64,
    /// Tickle hook invocations.
    pub tickles: AtomicU64,
    /// Idle hook invocations.
    pub idle_calls: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

#[cfg(feature = "metrics")]
impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "metrics")]
impl Metrics {
    /// Creates a new metrics instance.
    pub fn new() -> Self {
        Self {
            tasks_dispatched: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            fibers_requeued: AtomicU64::new(0),
            steals: AtomicU64::new(0),
            stolen_tasks: AtomicU64::new(0),
            balanced_tasks: AtomicU64::new(0),
            tickles: AtomicU64::new(0),
            idle_calls: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Returns a snapshot of current metrics values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_dispatched: self.tasks_dispatched.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            fibers_requeued: self.fibers_requeued.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            stolen_tasks: self.stolen_tasks.load(Ordering::Relaxed),
            balanced_tasks: self.balanced_tasks.load(Ordering::Relaxed),
            tickles: self.tickles.load(Ordering::Relaxed),
            idle_calls: self.idle_calls.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub tasks_dispatched: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub fibers_requeued: u64,
    pub steals: u64,
    pub stolen_tasks: u64,
    pub balanced_tasks: u64,
    pub tickles: u64,
    pub idle_calls: u64,
    pub elapsed_seconds: f64,
}

#[cfg(feature = "metrics")]
impl MetricsSnapshot {
    /// Calculates completed fibers per second.
    pub fn tasks_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.tasks_completed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Average number of tasks moved per successful steal.
    pub fn average_steal_batch(&self) -> f64 {
        if self.steals > 0 {
            self.stolen_tasks as f64 / self.steals as f64
        } else {
            0.0
        }
    }
}
