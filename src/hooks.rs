//! Wake and idle integration points.
//!
//! The scheduler calls [`SchedulerHooks::tickle`] when new work lands on an
//! empty queue and [`SchedulerHooks::idle`] when a worker finds nothing to
//! run. An I/O reactor layered on top overrides both to block on its event
//! source and to interrupt that wait.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

pub trait SchedulerHooks: Send + Sync + 'static {
    /// New work is available. `worker` is the queue owner that received it,
    /// or `None` when every worker may pick it up.
    fn tickle(&self, _worker: Option<usize>) {}

    /// `worker` found no runnable task. Returning lets the worker retry.
    fn idle(&self, _worker: usize) {
        std::thread::yield_now();
    }

    fn on_worker_start(&self, _worker: usize) {}

    fn on_worker_stop(&self, _worker: usize) {}
}

/// Tickle does nothing, idle yields the OS thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl SchedulerHooks for DefaultHooks {}

/// Parks idle workers on a condition variable and wakes them on tickle.
///
/// A pending tickle is remembered, so a wake that races with a worker on its
/// way to sleep is not lost.
#[derive(Debug)]
pub struct Parker {
    pending: Mutex<usize>,
    condvar: Condvar,
    timeout: Duration,
}

impl Parker {
    /// `timeout` bounds each idle wait, so workers still re-check the stop
    /// condition periodically.
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(0),
            condvar: Condvar::new(),
            timeout,
        }
    }
}

impl Default for Parker {
    fn default() -> Self {
        Self::new(Duration::from_millis(10))
    }
}

impl SchedulerHooks for Parker {
    fn tickle(&self, worker: Option<usize>) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_add(1);
        // The pinned worker may not be the one a single notify would reach.
        if worker.is_some() {
            self.condvar.notify_all();
        } else {
            self.condvar.notify_one();
        }
    }

    fn idle(&self, _worker: usize) {
        let mut pending = self.pending.lock();
        if *pending == 0 {
            let _ = self.condvar.wait_for(&mut pending, self.timeout);
        }
        *pending = pending.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_pending_tickle_is_not_lost() {
        let parker = Parker::new(Duration::from_secs(5));
        parker.tickle(None);
        let start = Instant::now();
        parker.idle(0);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_idle_times_out_without_tickle() {
        let parker = Parker::new(Duration::from_millis(5));
        parker.idle(0);
        assert_eq!(*parker.pending.lock(), 0);
    }

    #[test]
    fn test_tickle_wakes_sleeping_worker() {
        let parker = Arc::new(Parker::new(Duration::from_secs(5)));
        let sleeper = parker.clone();
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            sleeper.idle(0);
            start.elapsed()
        });
        std::thread::sleep(Duration::from_millis(20));
        parker.tickle(Some(0));
        let waited = handle.join().unwrap();
        assert!(waited < Duration::from_secs(4));
    }
}
