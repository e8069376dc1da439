use crate::error::FiberError;
use crate::fiber::{Entry, Fiber};
use std::sync::Arc;

/// A pool of finished fibers kept for reuse, so binding a closure task to a
/// fiber does not map a new stack every time.
/// Note: This pool is designed to be Thread-Local (used by a single Worker).
pub struct FiberPool {
    pool: Vec<Arc<Fiber>>,
    stack_size: usize,
    max_pooled: usize,
}

impl FiberPool {
    /// Creates a new fiber pool with `initial_count` pre-allocated fibers.
    pub fn new(initial_count: usize, stack_size: usize, max_pooled: usize) -> Self {
        let mut pool = FiberPool {
            pool: Vec::with_capacity(initial_count.min(max_pooled)),
            stack_size,
            max_pooled,
        };
        if let Err(err) = pool.grow(initial_count.min(max_pooled)) {
            tracing::warn!(%err, "fiber pool pre-warm stopped early");
        }
        pool
    }

    /// Grows the pool by up to `count` idle fibers.
    pub fn grow(&mut self, count: usize) -> Result<(), FiberError> {
        for _ in 0..count {
            self.pool.push(Fiber::new(self.stack_size, || {})?);
        }
        Ok(())
    }

    /// Binds `entry` to a pooled fiber, or to a freshly created one when the
    /// pool is empty.
    pub fn get(&mut self, entry: Entry) -> Result<Arc<Fiber>, FiberError> {
        if let Some(fiber) = self.pool.pop() {
            fiber.reset_boxed(entry)?;
            Ok(fiber)
        } else {
            Fiber::create(self.stack_size, entry, false)
        }
    }

    /// Offers a fiber back to the pool. Only finished fibers nobody else
    /// holds a handle to are kept; returns whether it was kept.
    pub fn recycle(&mut self, fiber: Arc<Fiber>) -> bool {
        if self.pool.len() >= self.max_pooled
            || !fiber.state().is_resettable()
            || Arc::strong_count(&fiber) != 1
        {
            return false;
        }
        self.pool.push(fiber);
        true
    }

    /// Returns the current number of fibers in the pool.
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}
