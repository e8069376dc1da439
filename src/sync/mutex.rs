use super::spin::SpinLock;
use super::wait_queue::{WaitQueue, park};
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// A mutual exclusion lock that suspends the calling fiber instead of the
/// worker thread.
///
/// Waiters are resumed in the order they blocked. On unlock, ownership
/// passes straight to the first waiter: the lock is never observed free in
/// between, so no newcomer can barge ahead of it.
///
/// The uncontended path works from any thread. Blocking requires running
/// inside a task fiber of a scheduler.
pub struct Mutex<T> {
    locked: AtomicBool,
    waiters: SpinLock<WaitQueue>,
    value: UnsafeCell<T>,
}

// SAFETY: `value` is only reachable through a guard, and guards are
// exclusive.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Mutex {
            locked: AtomicBool::new(false),
            waiters: SpinLock::new(WaitQueue::new()),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, parking the current fiber while it is held.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        if let Some(guard) = self.try_lock() {
            return guard;
        }
        let waiters = self.waiters.lock();
        // Unlock frees the lock only while holding the spinlock.
        if let Some(guard) = self.try_lock() {
            return guard;
        }
        park(waiters);
        // Resumed by unlock, which left `locked` set for us.
        MutexGuard { mutex: self }
    }

    /// Acquires the lock only if it is free right now.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| MutexGuard { mutex: self })
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Number of fibers parked on the lock.
    pub fn waiters(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    fn unlock(&self) {
        let mut waiters = self.waiters.lock();
        match waiters.pop() {
            Some(next) => {
                drop(waiters);
                next.wake();
            }
            None => self.locked.store(false, Ordering::Release),
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Mutex::new(T::default())
    }
}

impl<T> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .field("waiters", &self.waiters())
            .finish_non_exhaustive()
    }
}

/// RAII guard; dropping it unlocks (or hands off) the mutex.
pub struct MutexGuard<'a, T> {
    pub(super) mutex: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves exclusive ownership of the lock.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves exclusive ownership of the lock.
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<T: fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
