//! Error types for fiber creation and scheduler lifecycle.
//!
//! Recoverable failures are returned as typed errors. Broken runtime
//! invariants (double resume, destroying a primitive with parked waiters,
//! suspending outside of a task fiber) are defects and go through
//! [`invariant_violation`], which never returns.

use crate::fiber::FiberState;
use std::io;

/// Errors raised while creating or recycling a fiber.
#[derive(thiserror::Error, Debug)]
pub enum FiberError {
    /// The backing stack memory could not be obtained.
    #[error("failed to allocate a {requested}-byte fiber stack: {source}")]
    StackAllocation {
        requested: usize,
        #[source]
        source: io::Error,
    },

    /// The fiber is not in a state that allows the requested operation.
    #[error("fiber {id} cannot be reset while in state {state:?}")]
    InvalidState { id: u64, state: FiberState },
}

impl FiberError {
    pub fn is_allocation_failure(&self) -> bool {
        matches!(self, FiberError::StackAllocation { .. })
    }
}

/// Errors raised by scheduler lifecycle operations.
#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    #[error("scheduler `{0}` was already started")]
    AlreadyStarted(String),

    #[error("failed to spawn worker thread {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("{0} worker thread(s) panicked")]
    WorkerPanicked(usize),

    #[error(transparent)]
    Fiber(#[from] FiberError),
}

/// Reports a broken runtime invariant and aborts the process.
///
/// Must not be a panic: a fiber trampoline would contain it.
#[cold]
#[track_caller]
pub fn invariant_violation(msg: &str) -> ! {
    let location = std::panic::Location::caller();
    tracing::error!(%location, "runtime invariant violated: {msg}");
    eprintln!("[fibersched] FATAL at {location}: {msg}");
    std::process::abort()
}
