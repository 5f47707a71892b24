//! Shard Task Executor Module
//!
//! Cooperative scheduling for a clustering engine. Every piece of background work
//! (loading, merging, traversal, remake, deletions) is a `ShardTask` delivered to the
//! shard's queue, either to run now or at a later time.
//!
//! ## Core Mechanisms
//! 1. **Delivery**: `deliver_now` / `deliver_at` push a task with its due time.
//! 2. **Execution**: one worker per shard pops due tasks in order and runs them through
//!    the shard's handler. Tasks never overlap, so each one only has to be atomic with
//!    respect to the shard's lock.
//! 3. **Rescheduling**: tasks reschedule themselves; the executor has no retry policy.
//! 4. **Shutdown**: stopping the queue drops pending tasks and ends the worker after the
//!    running task completes.
//!
//! ## Submodules
//! - **`types`**: the `ShardTask` enum and its scheduled form.
//! - **`queue`**: the timed priority queue.
//! - **`executor`**: the worker.

pub mod executor;
pub mod queue;
pub mod types;

#[cfg(test)]
mod tests;
