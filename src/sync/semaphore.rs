use super::spin::SpinLock;
use super::wait_queue::{WaitQueue, park};
use std::fmt;

struct State {
    permits: usize,
    waiters: WaitQueue,
}

impl AsMut<WaitQueue> for State {
    fn as_mut(&mut self) -> &mut WaitQueue {
        &mut self.waiters
    }
}

/// Counting semaphore that parks fibers instead of threads.
///
/// A `notify` with fibers waiting hands its permit directly to the oldest
/// waiter.
pub struct Semaphore {
    state: SpinLock<State>,
}

impl Semaphore {
    pub const fn new(permits: usize) -> Self {
        Semaphore {
            state: SpinLock::new(State {
                permits,
                waiters: WaitQueue::new(),
            }),
        }
    }

    /// Takes a permit, parking the current fiber until one is available.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        if state.permits > 0 {
            state.permits -= 1;
            return;
        }
        park(state);
    }

    /// Takes a permit if one is available right now.
    pub fn try_wait(&self) -> bool {
        let mut state = self.state.lock();
        if state.permits > 0 {
            state.permits -= 1;
            true
        } else {
            false
        }
    }

    /// Releases a permit, waking the oldest waiter if there is one.
    pub fn notify(&self) {
        let mut state = self.state.lock();
        match state.waiters.pop() {
            Some(waiter) => {
                drop(state);
                waiter.wake();
            }
            None => state.permits += 1,
        }
    }

    /// Permits currently available without blocking.
    pub fn available(&self) -> usize {
        self.state.lock().permits
    }

    /// Number of fibers parked on the semaphore.
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Semaphore")
            .field("permits", &state.permits)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Scheduler, SchedulerConfig};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_permits_without_fibers() {
        let semaphore = Semaphore::new(2);
        assert!(semaphore.try_wait());
        semaphore.wait();
        assert_eq!(semaphore.available(), 0);
        assert!(!semaphore.try_wait());

        semaphore.notify();
        assert_eq!(semaphore.available(), 1);
    }

    #[test]
    fn test_notify_wakes_parked_fibers() {
        let scheduler = Scheduler::new(SchedulerConfig::new("sem", 2));
        scheduler.start().unwrap();

        let semaphore = Arc::new(Semaphore::new(0));
        let passed = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let semaphore = semaphore.clone();
            let passed = passed.clone();
            scheduler.schedule(move || {
                semaphore.wait();
                passed.fetch_add(1, Ordering::SeqCst);
            });
        }

        while semaphore.waiters() < 8 {
            std::thread::yield_now();
        }
        assert_eq!(passed.load(Ordering::SeqCst), 0);

        for _ in 0..8 {
            semaphore.notify();
        }
        scheduler.stop().unwrap();

        assert_eq!(passed.load(Ordering::SeqCst), 8);
        assert_eq!(semaphore.available(), 0);
    }
}
