//! # fibersched - Stackful Fibers on a Multi-Worker Scheduler
//!
//! A cooperative M:N runtime: many lightweight user-space execution contexts
//! (fibers) are multiplexed onto a fixed pool of OS worker threads. Each
//! worker runs a scheduling loop on its own scheduling fiber and switches
//! into task fibers, which give control back only at explicit suspension
//! points.
//!
//! ## Architecture
//!
//! - **Fibers**: stackful contexts with an explicit status machine
//!   (Init, Exec, Hold, Ready, Term, Except), guard-paged mmap stacks and a
//!   trampoline that contains panics raised by their entry closure
//! - **Scheduler**: per-worker FIFO queues (or one global queue), round
//!   robin / random / least-loaded placement, worker affinity, work
//!   stealing and periodic load balancing
//! - **Hooks**: overridable tickle/idle points for an I/O reactor layered on top
//! - **Sync**: fiber-aware [`Mutex`], [`Semaphore`] and [`Condition`] that park
//!   only the calling fiber, never the worker thread
//!
//! ## Example
//!
//! ```no_run
//! use fibersched::{Fiber, Scheduler, SchedulerConfig};
//!
//! let scheduler = Scheduler::new(SchedulerConfig::new("example", 4));
//! scheduler.start().unwrap();
//!
//! scheduler.schedule(|| {
//!     println!("Hello from fiber {}", Fiber::current_id());
//!     Fiber::yield_to_ready();
//!     println!("...and back again");
//! });
//!
//! scheduler.stop().unwrap();
//! ```

pub mod config;
pub mod error;
pub mod fiber;
pub mod fiber_pool;
pub mod hooks;
pub mod metrics;
mod queue;
pub mod scheduler;
pub mod stack;
pub mod sync;
pub mod task;
mod worker;

pub use config::{Distribution, FiberConfig, PinningStrategy, QueueMode, SchedulerConfig};
pub use error::{FiberError, SchedulerError};
pub use fiber::{Fiber, FiberKind, FiberState};
pub use fiber_pool::FiberPool;
pub use hooks::{DefaultHooks, Parker, SchedulerHooks};
pub use scheduler::{Handle, Scheduler};
pub use sync::{Condition, Mutex, MutexGuard, Semaphore};
pub use task::Task;

#[cfg(feature = "metrics")]
pub use metrics::{Metrics, MetricsSnapshot};

#[cfg(test)]
mod tests;
