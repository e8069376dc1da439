//! Per-worker FIFO task queues.
//!
//! Producers on any thread push under a short per-queue lock; the length is
//! mirrored in an atomic counter so queue selection and load balancing can
//! scan lengths without taking any lock.

use crate::task::Task;
use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Result of popping for a specific worker.
#[derive(Debug)]
pub(crate) struct Pop {
    pub task: Option<Task>,
    /// Tasks pinned to other workers were passed over.
    pub skipped_pinned: bool,
}

#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    len: CachePadded<AtomicUsize>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Approximate length, read without locking.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a task. Returns whether the queue was empty before.
    pub fn push(&self, task: Task) -> bool {
        let mut tasks = self.tasks.lock();
        let was_empty = tasks.is_empty();
        tasks.push_back(task);
        self.len.store(tasks.len(), Ordering::Release);
        was_empty
    }

    /// Appends every task of `batch` under one lock acquisition. Returns
    /// whether the queue went from empty to non-empty.
    pub fn push_batch(&self, batch: impl IntoIterator<Item = Task>) -> bool {
        let mut tasks = self.tasks.lock();
        let was_empty = tasks.is_empty();
        tasks.extend(batch);
        self.len.store(tasks.len(), Ordering::Release);
        was_empty && !tasks.is_empty()
    }

    /// Removes the first task `worker` may run, in FIFO order.
    pub fn pop_for(&self, worker: usize) -> Pop {
        if self.is_empty() {
            return Pop {
                task: None,
                skipped_pinned: false,
            };
        }
        let mut tasks = self.tasks.lock();
        let position = tasks.iter().position(|task| task.runs_on(worker));
        let skipped_pinned = match position {
            Some(index) => index > 0,
            None => !tasks.is_empty(),
        };
        let task = position.and_then(|index| tasks.remove(index));
        self.len.store(tasks.len(), Ordering::Release);
        Pop {
            task,
            skipped_pinned,
        }
    }

    /// Takes up to `max` unpinned tasks from the front (oldest first).
    pub fn steal_unpinned(&self, max: usize) -> Vec<Task> {
        self.take_unpinned(max, false)
    }

    /// Takes up to `max` unpinned tasks from the back (newest first),
    /// returned in their original queue order.
    pub fn take_unpinned_tail(&self, max: usize) -> Vec<Task> {
        self.take_unpinned(max, true)
    }

    fn take_unpinned(&self, max: usize, from_back: bool) -> Vec<Task> {
        if max == 0 || self.is_empty() {
            return Vec::new();
        }
        let mut tasks = self.tasks.lock();
        let mut indices: Vec<usize> = Vec::with_capacity(max);
        if from_back {
            indices.extend(
                (0..tasks.len())
                    .rev()
                    .filter(|&i| tasks[i].affinity().is_none())
                    .take(max),
            );
        } else {
            indices.extend(
                (0..tasks.len())
                    .filter(|&i| tasks[i].affinity().is_none())
                    .take(max),
            );
        }
        // Remove from the highest index down so earlier indices stay valid.
        indices.sort_unstable_by(|a, b| b.cmp(a));
        let mut taken: Vec<Task> = indices
            .into_iter()
            .filter_map(|index| tasks.remove(index))
            .collect();
        taken.reverse();
        self.len.store(tasks.len(), Ordering::Release);
        taken
    }
}
