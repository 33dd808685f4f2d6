use concurrent_queue::ConcurrentQueue;

use crate::task::Task;

/// Lock-free MPSC-style queue of immediate tasks waiting to be dispatched
/// on the loop thread. Wakeup is handled separately by the loop's own
/// [`crate::waker::Waker`], so this queue carries no readiness state of
/// its own.
pub(crate) struct TaskQueue {
    inner: ConcurrentQueue<Task>,
}

impl TaskQueue {
    pub fn new() -> TaskQueue {
        TaskQueue {
            inner: ConcurrentQueue::unbounded(),
        }
    }

    /// Returns `false` if the queue is closed (the owning loop has been
    /// stopped) and the task was dropped instead of queued.
    pub fn push(&self, task: Task) -> bool {
        self.inner.push(task).is_ok()
    }

    pub fn pop(&self) -> Option<Task> {
        self.inner.pop().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn close(&self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn fifo_order() {
        let q = TaskQueue::new();
        let seen = Arc::new(AtomicUsize::new(0));
        for i in 0..5 {
            let seen = seen.clone();
            q.push(Task::new(
                Box::new(move || {
                    seen.store(i, Ordering::SeqCst);
                }),
                None,
                None,
            ));
        }
        let mut last = None;
        while let Some(task) = q.pop() {
            (task.func)();
            last = Some(seen.load(Ordering::SeqCst));
        }
        assert_eq!(last, Some(4));
        assert!(q.is_empty());
    }
}
