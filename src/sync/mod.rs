//! Fiber-aware synchronization primitives.
//!
//! OS-level blocking would stall a worker thread and every fiber
//! multiplexed on it. These primitives park only the requesting fiber: the
//! waiter and its scheduler are appended to a FIFO wait list under a short
//! spinlock, the fiber yields to Hold, and the releasing side schedules it
//! again, handing ownership over directly.

mod condition;
mod mutex;
mod semaphore;
mod spin;
mod wait_queue;

pub use condition::Condition;
pub use mutex::{Mutex, MutexGuard};
pub use semaphore::Semaphore;
pub use spin::{SpinLock, SpinLockGuard};
