//! Shard Task Queue
//!
//! Timed priority queue of `ShardTask`s. Tasks due now are handed out in submission
//! order; future tasks wait until their due time. A `Notify` wakes the worker when a
//! task is delivered or the queue is stopped.

use super::types::*;

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

pub struct TaskQueue {
    heap: Mutex<BinaryHeap<Reverse<ScheduledTask>>>,
    seq: AtomicU64,
    notify: Notify,
    stopped: AtomicBool,
}

impl TaskQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            notify: Notify::new(),
            stopped: AtomicBool::new(false),
        })
    }

    fn heap(&self) -> MutexGuard<'_, BinaryHeap<Reverse<ScheduledTask>>> {
        // The heap holds plain data; a panic mid-push leaves it usable.
        self.heap.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Schedules a task to run as soon as the worker is free.
    pub fn deliver_now(&self, task: ShardTask) {
        self.deliver_at(task, Duration::ZERO);
    }

    /// Schedules a task to run after `delay`.
    pub fn deliver_at(&self, task: ShardTask, delay: Duration) {
        if self.stopped.load(Ordering::SeqCst) {
            tracing::trace!("Queue stopped, dropping task {}", task.name());
            return;
        }

        let scheduled = ScheduledTask {
            due: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            task,
        };

        self.heap().push(Reverse(scheduled));
        self.notify.notify_one();
    }

    /// Waits for the next due task. Returns `None` once the queue is stopped.
    pub async fn next(&self) -> Option<ShardTask> {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return None;
            }

            let next_due = {
                let mut heap = self.heap();
                match heap.peek() {
                    Some(Reverse(head)) if head.due <= Instant::now() => {
                        return heap.pop().map(|Reverse(s)| s.task);
                    }
                    Some(Reverse(head)) => Some(head.due),
                    None => None,
                }
            };

            match next_due {
                Some(due) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(due.into()) => {}
                        _ = self.notify.notified() => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Stops the queue and drops every pending task.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.heap().clear();
        self.notify.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Number of scheduled tasks, due or not.
    pub fn len(&self) -> usize {
        self.heap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap().is_empty()
    }

    /// Whether a task of the same kind is already scheduled.
    pub fn contains(&self, task: &ShardTask) -> bool {
        self.heap().iter().any(|Reverse(s)| &s.task == task)
    }
}
