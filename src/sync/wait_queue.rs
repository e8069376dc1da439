use super::spin::SpinLockGuard;
use crate::error::invariant_violation;
use crate::fiber::{Fiber, FiberKind};
use crate::scheduler::Handle;
use std::collections::VecDeque;
use std::sync::Arc;

/// A parked fiber and the scheduler that must resume it.
pub(crate) struct Waiter {
    handle: Handle,
    fiber: Arc<Fiber>,
}

impl Waiter {
    /// Captures the running task fiber and its scheduler.
    ///
    /// Blocking only makes sense inside a task fiber driven by a scheduler;
    /// anything else is a fatal defect.
    pub(crate) fn current() -> Waiter {
        let Some(fiber) = Fiber::try_current().filter(|f| f.kind() == FiberKind::Task) else {
            invariant_violation("fiber primitive blocked outside of a task fiber");
        };
        let Some(handle) = Handle::current() else {
            invariant_violation("fiber primitive blocked without a current scheduler");
        };
        Waiter { handle, fiber }
    }

    /// Hands the fiber back to its scheduler.
    pub(crate) fn wake(self) {
        tracing::trace!(fiber_id = self.fiber.id(), scheduler = %self.handle.name(), "wake waiter");
        self.handle.schedule_fiber(self.fiber);
    }
}

/// FIFO list of parked fibers. Dropping it with waiters still parked is fatal.
#[derive(Default)]
pub(crate) struct WaitQueue {
    waiters: VecDeque<Waiter>,
}

impl WaitQueue {
    pub(crate) const fn new() -> Self {
        WaitQueue {
            waiters: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, waiter: Waiter) {
        self.waiters.push_back(waiter);
    }

    pub(crate) fn pop(&mut self) -> Option<Waiter> {
        self.waiters.pop_front()
    }

    pub(crate) fn take_all(&mut self) -> VecDeque<Waiter> {
        std::mem::take(&mut self.waiters)
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }
}

impl Drop for WaitQueue {
    fn drop(&mut self) {
        if !self.waiters.is_empty() {
            invariant_violation("synchronization primitive destroyed with parked fibers");
        }
    }
}

impl AsMut<WaitQueue> for WaitQueue {
    fn as_mut(&mut self) -> &mut WaitQueue {
        self
    }
}

/// Parks the current fiber: queues it while `guard` is held, releases the
/// guard, then yields to Hold until a waker schedules it again.
pub(crate) fn park<T: AsMut<WaitQueue>>(mut guard: SpinLockGuard<'_, T>) {
    (*guard).as_mut().push(Waiter::current());
    drop(guard);
    Fiber::yield_to_hold();
}
