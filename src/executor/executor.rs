//! Shard Worker
//!
//! Drives one `TaskQueue` with a single worker, so tasks of a shard never run in
//! parallel. Each task is handed to the shard's handler closure.

use super::queue::TaskQueue;
use super::types::*;

use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Type alias for a thread-safe, asynchronous task handler function.
/// It takes a `ShardTask` and returns a Future that resolves to a `Result<()>`.
pub type TaskHandlerFn =
    Arc<dyn Fn(ShardTask) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

pub struct TaskExecutor {
    name: String,
    queue: Arc<TaskQueue>,
    handler: TaskHandlerFn,
}

impl TaskExecutor {
    pub fn new<F, Fut>(name: impl Into<String>, queue: Arc<TaskQueue>, handler: F) -> Arc<Self>
    where
        F: Fn(ShardTask) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        // Type-erase the handler's future so the executor is not generic over it.
        let handler: TaskHandlerFn = Arc::new(move |task: ShardTask| {
            Box::pin(handler(task)) as Pin<Box<dyn Future<Output = Result<()>> + Send>>
        });

        Arc::new(Self {
            name: name.into(),
            queue,
            handler,
        })
    }

    /// Spawns the worker and returns its handle. The worker exits once the queue is
    /// stopped.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tracing::info!("Starting task worker for {}", self.name);
        tokio::spawn(async move {
            self.worker_loop().await;
        })
    }

    async fn worker_loop(&self) {
        while let Some(task) = self.queue.next().await {
            let task_name = task.name();
            tracing::trace!("{}: running {}", self.name, task_name);

            if let Err(e) = (self.handler)(task).await {
                tracing::warn!("{}: task {} failed: {:#}", self.name, task_name, e);
            }
        }

        tracing::info!("Task worker for {} stopped", self.name);
    }
}
