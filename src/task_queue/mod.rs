//! Task queue
//!
//! The single place where deferred work actually executes. Every promise
//! settlement notification is turned into a [`Task`] and appended to a
//! [`TaskQueue`]; nothing runs until the host (or a blocking `wait`) drains
//! the queue with [`TaskQueue::run`].
//!
//! There is no ambient global queue. The composition root constructs one
//! queue and hands it to everything that creates promises; clones of a
//! `TaskQueue` are handles to the same FIFO.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// A deferred thunk
pub struct Task {
    callback: Box<dyn FnOnce()>,
}

impl Task {
    /// Creates a new Task from a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            callback: Box::new(f),
        }
    }

    /// Executes the task.
    pub fn run(self) {
        (self.callback)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task {{ ... }}")
    }
}

/// Runtime statistics for a task queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Tasks appended over the queue's lifetime
    pub tasks_added: u64,
    /// Tasks executed over the queue's lifetime
    pub tasks_run: u64,
    /// Calls to `run`, nested calls included
    pub drains: u64,
    /// Most tasks executed by a single `run` call
    pub max_tasks_per_drain: u64,
}

#[derive(Default)]
struct QueueInner {
    tasks: VecDeque<Task>,
    stats: QueueStats,
}

/// Shared FIFO of deferred tasks
#[derive(Clone, Default)]
pub struct TaskQueue {
    inner: Rc<RefCell<QueueInner>>,
}

impl TaskQueue {
    /// Create a new empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a closure to the tail of the queue
    pub fn add<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        self.add_task(Task::new(f));
    }

    /// Append a task to the tail of the queue
    pub fn add_task(&self, task: Task) {
        let mut inner = self.inner.borrow_mut();
        inner.tasks.push_back(task);
        inner.stats.tasks_added += 1;
        trace!(queued = inner.tasks.len(), "task added");
    }

    /// Run tasks until the queue is empty.
    ///
    /// Tasks added while draining are executed by the same call. The queue is
    /// not borrowed while a task executes, so a task may add tasks or drain
    /// the queue itself. Returns the number of tasks this call executed.
    pub fn run(&self) -> usize {
        let mut count: usize = 0;
        loop {
            let task = self.inner.borrow_mut().tasks.pop_front();
            match task {
                Some(task) => {
                    task.run();
                    count += 1;
                }
                None => break,
            }
        }

        let mut inner = self.inner.borrow_mut();
        inner.stats.drains += 1;
        inner.stats.tasks_run += count as u64;
        if (count as u64) > inner.stats.max_tasks_per_drain {
            inner.stats.max_tasks_per_drain = count as u64;
        }
        if count > 0 {
            trace!(count, "task queue drained");
        }
        count
    }

    /// Returns true if no task is waiting
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().tasks.is_empty()
    }

    /// Returns the number of waiting tasks
    pub fn len(&self) -> usize {
        self.inner.borrow().tasks.len()
    }

    /// Get runtime statistics
    pub fn stats(&self) -> QueueStats {
        self.inner.borrow().stats.clone()
    }

    /// Reset runtime statistics
    pub fn reset_stats(&self) {
        self.inner.borrow_mut().stats = QueueStats::default();
    }

    /// Whether two handles refer to the same queue
    pub fn ptr_eq(&self, other: &TaskQueue) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Return a guard that drains this queue when it goes out of scope
    pub fn drain_on_drop(&self) -> DrainGuard {
        DrainGuard {
            queue: self.clone(),
        }
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.len())
            .finish()
    }
}

/// Drains its queue on drop.
///
/// Stands in for "run whatever is left when the program exits": hold one in
/// the scope that owns the queue. Nothing is drained while unwinding.
#[must_use = "the queue is drained when the guard is dropped"]
#[derive(Debug)]
pub struct DrainGuard {
    queue: TaskQueue,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.queue.run();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_new_queue_is_empty() {
        let queue = TaskQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_run_is_fifo() {
        let queue = TaskQueue::new();
        let order = Rc::new(RefCell::new(vec![]));

        for i in 1..=3 {
            let o = order.clone();
            queue.add(move || o.borrow_mut().push(i));
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.run(), 3);
        assert_eq!(*order.borrow(), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_tasks_added_during_drain_run_in_same_drain() {
        let queue = TaskQueue::new();
        let order = Rc::new(RefCell::new(vec![]));

        let (q, o) = (queue.clone(), order.clone());
        queue.add(move || {
            o.borrow_mut().push('a');
            let o2 = o.clone();
            q.add(move || o2.borrow_mut().push('c'));
        });
        let o = order.clone();
        queue.add(move || o.borrow_mut().push('b'));

        assert_eq!(queue.run(), 3);
        assert_eq!(*order.borrow(), vec!['a', 'b', 'c']);
    }

    #[test]
    fn test_nested_run() {
        let queue = TaskQueue::new();
        let hits = Rc::new(RefCell::new(0));

        let (q, h) = (queue.clone(), hits.clone());
        queue.add(move || {
            let h2 = h.clone();
            q.add(move || *h2.borrow_mut() += 1);
            q.run();
            *h.borrow_mut() += 10;
        });

        queue.run();
        assert_eq!(*hits.borrow(), 11);
        assert_eq!(queue.stats().drains, 2);
        assert_eq!(queue.stats().tasks_run, 2);
    }

    #[test]
    fn test_drain_guard() {
        let queue = TaskQueue::new();
        let hit = Rc::new(RefCell::new(false));
        {
            let _guard = queue.drain_on_drop();
            let h = hit.clone();
            queue.add(move || *h.borrow_mut() = true);
            assert!(!*hit.borrow());
        }
        assert!(*hit.borrow());
    }

    #[test]
    fn test_stats() {
        let queue = TaskQueue::new();
        queue.add(|| {});
        queue.add(|| {});
        queue.run();
        queue.run();
        let stats = queue.stats();
        assert_eq!(stats.tasks_added, 2);
        assert_eq!(stats.tasks_run, 2);
        assert_eq!(stats.drains, 2);
        assert_eq!(stats.max_tasks_per_drain, 2);

        queue.reset_stats();
        assert_eq!(queue.stats(), QueueStats::default());
    }

    #[test]
    fn test_handles_share_queue() {
        let a = TaskQueue::new();
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&TaskQueue::new()));
        b.add(|| {});
        assert_eq!(a.len(), 1);
    }
}
