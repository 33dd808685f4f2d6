use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::task::{DelayedTask, Task};

/// Min-heap of tasks ordered by deadline, guarded by a plain mutex since
/// only the loop thread pops from it but any thread may push.
///
/// [`DelayedTask`]'s `Ord` is reversed so the earliest deadline sorts
/// greatest, turning `BinaryHeap` (a max-heap) into a min-heap keyed on
/// soonest-to-fire.
pub(crate) struct DelayQueue {
    heap: Mutex<BinaryHeap<DelayedTask>>,
    seq: AtomicU64,
}

impl DelayQueue {
    pub fn new() -> DelayQueue {
        DelayQueue {
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn insert(&self, task: Task, delay: Duration) -> Instant {
        let deadline = Instant::now() + delay;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.heap.lock().unwrap().push(DelayedTask {
            task,
            deadline,
            seq,
        });
        deadline
    }

    /// Returns the duration until the next deadline, or `None` if empty.
    pub fn next_wait(&self) -> Option<Duration> {
        let heap = self.heap.lock().unwrap();
        heap.peek().map(|t| {
            let now = Instant::now();
            if t.deadline > now {
                t.deadline - now
            } else {
                Duration::from_millis(0)
            }
        })
    }

    /// Drains every task whose deadline has passed.
    pub fn drain_expired(&self) -> Vec<Task> {
        let now = Instant::now();
        let mut heap = self.heap.lock().unwrap();
        let mut out = Vec::new();
        while let Some(t) = heap.peek() {
            if t.deadline > now {
                break;
            }
            out.push(heap.pop().unwrap().task);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn noop_task() -> Task {
        Task::new(Box::new(|| {}), None, None)
    }

    #[test]
    fn pops_in_deadline_order() {
        let dq = DelayQueue::new();
        dq.insert(noop_task(), Duration::from_millis(50));
        dq.insert(noop_task(), Duration::from_millis(0));
        dq.insert(noop_task(), Duration::from_millis(10));

        std::thread::sleep(Duration::from_millis(20));
        let expired = dq.drain_expired();
        assert_eq!(expired.len(), 2);
        assert!(!dq.is_empty());
    }

    #[test]
    fn next_wait_reflects_soonest_deadline() {
        let dq = DelayQueue::new();
        assert!(dq.next_wait().is_none());
        dq.insert(noop_task(), Duration::from_secs(10));
        assert!(dq.next_wait().unwrap() <= Duration::from_secs(10));
    }

    #[test]
    fn runs_in_order_when_drained() {
        let dq = DelayQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));

        for i in 0..3 {
            let order = order.clone();
            dq.insert(
                Task::new(
                    Box::new(move || order.lock().unwrap().push(i)),
                    None,
                    None,
                ),
                Duration::from_millis(0),
            );
        }
        let _ = counter;
        std::thread::sleep(Duration::from_millis(5));
        for task in dq.drain_expired() {
            (task.func)();
        }
        assert_eq!(order.lock().unwrap().len(), 3);
    }
}
