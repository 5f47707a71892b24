use crate::event::types::MessageId;

use std::cmp::Ordering;
use std::time::Instant;

/// A unit of work of one clustering engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardTask {
    /// Read the next chunk of persisted events (then orphan messages).
    LoadEvents,
    /// Pop changed events and merge them into their best candidates.
    MergeEvents,
    /// Maintenance traversal: cleanup, revision, flush, push.
    TraverseEvents,
    /// Low-frequency remake sweep.
    RemakeTraverse,
    /// Detach the given members from their events.
    DeleteMessages(Vec<MessageId>),
}

impl ShardTask {
    pub fn name(&self) -> &'static str {
        match self {
            ShardTask::LoadEvents => "load_events",
            ShardTask::MergeEvents => "merge_events",
            ShardTask::TraverseEvents => "traverse_events",
            ShardTask::RemakeTraverse => "remake_traverse",
            ShardTask::DeleteMessages(_) => "delete_messages",
        }
    }
}

/// A task with its due time. Ordered by due time, then submission order.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub due: Instant,
    pub seq: u64,
    pub task: ShardTask,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledTask {}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
