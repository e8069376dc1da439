//! Task definitions.
//!
//! A task is the unit handed to the scheduler: either a closure that still
//! needs a fiber to run on, or a suspended fiber that should be resumed.
//! It optionally names the worker it must run on.

use crate::fiber::{Entry, Fiber};
use std::fmt;
use std::sync::Arc;

/// The work carried by a [`Task`].
pub enum Work {
    /// A closure, bound to a fresh or recycled fiber when dispatched.
    Func(Entry),
    /// An existing suspended fiber to resume.
    Fiber(Arc<Fiber>),
}

/// A unit of work queued on the scheduler.
pub struct Task {
    work: Work,
    /// Worker index this task is pinned to, `None` if any worker may run it.
    affinity: Option<usize>,
}

impl Task {
    /// Creates a task from a closure.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task {
            work: Work::Func(Box::new(work)),
            affinity: None,
        }
    }

    /// Creates a task that resumes `fiber`.
    pub fn resume(fiber: Arc<Fiber>) -> Self {
        Task {
            work: Work::Fiber(fiber),
            affinity: None,
        }
    }

    /// Pins the task to a worker.
    pub fn with_affinity(mut self, worker: Option<usize>) -> Self {
        self.affinity = worker;
        self
    }

    pub fn affinity(&self) -> Option<usize> {
        self.affinity
    }

    /// Whether the worker `index` may run this task.
    pub fn runs_on(&self, index: usize) -> bool {
        self.affinity.is_none_or(|worker| worker == index)
    }

    pub(crate) fn into_parts(self) -> (Work, Option<usize>) {
        (self.work, self.affinity)
    }
}

impl From<Arc<Fiber>> for Task {
    fn from(fiber: Arc<Fiber>) -> Self {
        Task::resume(fiber)
    }
}

impl From<Entry> for Task {
    fn from(entry: Entry) -> Self {
        Task {
            work: Work::Func(entry),
            affinity: None,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let work = match &self.work {
            Work::Func(_) => "Func".to_string(),
            Work::Fiber(fiber) => format!("Fiber({})", fiber.id()),
        };
        f.debug_struct("Task")
            .field("work", &work)
            .field("affinity", &self.affinity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_closure_task() {
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        let task = Task::new(move || {
            executed_clone.store(true, Ordering::SeqCst);
        });
        assert_eq!(task.affinity(), None);
        assert!(task.runs_on(0) && task.runs_on(7));

        match task.into_parts() {
            (Work::Func(f), None) => f(),
            _ => panic!("expected an unpinned closure task"),
        }
        assert!(executed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_fiber_task_with_affinity() {
        let fiber = Fiber::new(64 * 1024, || {}).unwrap();
        let task = Task::from(fiber.clone()).with_affinity(Some(1));
        assert!(task.runs_on(1));
        assert!(!task.runs_on(0));
        assert!(format!("{task:?}").contains(&format!("Fiber({})", fiber.id())));
    }
}
