use super::mutex::MutexGuard;
use super::spin::SpinLock;
use super::wait_queue::{WaitQueue, park};

/// Condition variable for fibers, paired with [`Mutex`](super::Mutex).
///
/// Like any condition variable, a woken fiber must re-check its predicate.
#[derive(Default)]
pub struct Condition {
    waiters: SpinLock<WaitQueue>,
}

impl Condition {
    pub const fn new() -> Self {
        Condition {
            waiters: SpinLock::new(WaitQueue::new()),
        }
    }

    /// Releases `guard`, parks the current fiber until notified, then
    /// re-acquires the mutex.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mutex = guard.mutex;
        let waiters = self.waiters.lock();
        // Queued before the mutex is released, so a notify issued by the
        // next holder cannot be missed.
        drop(guard);
        park(waiters);
        mutex.lock()
    }

    /// Wakes the oldest waiter. Returns whether there was one.
    pub fn notify_one(&self) -> bool {
        let waiter = self.waiters.lock().pop();
        match waiter {
            Some(waiter) => {
                waiter.wake();
                true
            }
            None => false,
        }
    }

    /// Wakes every waiter. Returns how many there were.
    pub fn notify_all(&self) -> usize {
        let waiters = self.waiters.lock().take_all();
        let count = waiters.len();
        waiters.into_iter().for_each(|waiter| waiter.wake());
        count
    }

    pub fn waiters(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Condition")
            .field("waiters", &self.waiters())
            .finish()
    }
}
