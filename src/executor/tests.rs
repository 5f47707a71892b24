//! Executor Module Tests
//!
//! ## Test Scopes
//! - **Queue**: ordering of due and delayed tasks, stop semantics.
//! - **Executor**: the worker runs every task once and survives failing tasks.

#[cfg(test)]
mod tests {
    use crate::event::types::MessageId;
    use crate::executor::executor::TaskExecutor;
    use crate::executor::queue::TaskQueue;
    use crate::executor::types::ShardTask;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    // ============================================================
    // QUEUE
    // ============================================================

    #[tokio::test]
    async fn test_due_tasks_run_in_submission_order() {
        // ARRANGE
        let queue = TaskQueue::new();
        queue.deliver_now(ShardTask::LoadEvents);
        queue.deliver_now(ShardTask::MergeEvents);
        queue.deliver_now(ShardTask::TraverseEvents);

        // ACT & ASSERT
        assert_eq!(queue.next().await, Some(ShardTask::LoadEvents));
        assert_eq!(queue.next().await, Some(ShardTask::MergeEvents));
        assert_eq!(queue.next().await, Some(ShardTask::TraverseEvents));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_delayed_task_waits_for_due_time() {
        // ARRANGE
        let queue = TaskQueue::new();
        queue.deliver_at(ShardTask::TraverseEvents, Duration::from_millis(200));
        queue.deliver_now(ShardTask::MergeEvents);

        // ACT
        let first = queue.next().await;
        let started = std::time::Instant::now();
        let second = queue.next().await;

        // ASSERT: the immediate task overtakes the delayed one
        assert_eq!(first, Some(ShardTask::MergeEvents));
        assert_eq!(second, Some(ShardTask::TraverseEvents));
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_delivery_wakes_waiting_worker() {
        // ARRANGE
        let queue = TaskQueue::new();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };

        // ACT
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.deliver_now(ShardTask::DeleteMessages(vec![MessageId(7)]));

        // ASSERT
        let task = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task, Some(ShardTask::DeleteMessages(vec![MessageId(7)])));
    }

    #[tokio::test]
    async fn test_stop_drops_pending_and_rejects_new_tasks() {
        // ARRANGE
        let queue = TaskQueue::new();
        queue.deliver_at(ShardTask::TraverseEvents, Duration::from_secs(60));

        // ACT
        queue.stop();
        queue.deliver_now(ShardTask::MergeEvents);

        // ASSERT
        assert!(queue.is_stopped());
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.next().await, None);
    }

    #[tokio::test]
    async fn test_contains_matches_task_kind() {
        let queue = TaskQueue::new();
        queue.deliver_at(ShardTask::MergeEvents, Duration::from_secs(5));

        assert!(queue.contains(&ShardTask::MergeEvents));
        assert!(!queue.contains(&ShardTask::TraverseEvents));
    }

    // ============================================================
    // EXECUTOR
    // ============================================================

    #[tokio::test]
    async fn test_executor_runs_tasks_and_survives_failures() {
        // ARRANGE
        let queue = TaskQueue::new();
        let call_count = Arc::new(AtomicUsize::new(0));
        let count = call_count.clone();

        let executor = TaskExecutor::new("test", queue.clone(), move |task| {
            let count = count.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                match task {
                    ShardTask::MergeEvents => Err(anyhow::anyhow!("Intentional error")),
                    _ => Ok(()),
                }
            }
        });

        // ACT
        let handle = executor.start();
        queue.deliver_now(ShardTask::MergeEvents);
        queue.deliver_now(ShardTask::TraverseEvents);
        queue.deliver_now(ShardTask::LoadEvents);

        for _ in 0..100 {
            if call_count.load(Ordering::SeqCst) == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        queue.stop();

        // ASSERT
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_task_names() {
        assert_eq!(ShardTask::LoadEvents.name(), "load_events");
        assert_eq!(ShardTask::DeleteMessages(vec![]).name(), "delete_messages");
    }
}
