use crate::event::event::Event;
use crate::event::types::*;
use crate::index::blacklist::{HashPair, MergeDenial};
use crate::index::changed::EventCardinality;

use serde::{Deserialize, Serialize};

/// Direction of an event migration along the bank ring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

/// Event metadata travelling with its member digests on a push.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventPushInfo {
    pub id: EventId,
    /// Hops left after this one.
    pub spin: i32,
    /// Persistent flag bits.
    pub flags: u8,
    pub dissenters: u32,
}

/// One side's share of a traversal's migrations.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PushPack {
    pub digests: Vec<MessageDigest>,
    pub events: Vec<EventPushInfo>,
}

impl PushPack {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Changed-event queue and merge denials handed between engines and the snapshot file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardSnapshot {
    pub changed: Vec<EventCardinality>,
    pub blacklist: Vec<(HashPair, MergeDenial)>,
}

impl ShardSnapshot {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.blacklist.is_empty()
    }
}

/// Result of a dissenter scan over an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DissenterScan {
    pub dissenters: u32,
    /// Lowest-overlap member, earliest published on ties.
    pub candidate: Option<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardStatus {
    pub langs: Vec<Lang>,
    pub loaded: bool,
    pub events: usize,
    pub messages: usize,
    pub changed_events: usize,
    pub dissenters: u64,
    pub blacklist: usize,
    pub cached_messages: usize,
    pub queued_tasks: usize,
    pub traverse_period: u64,
}

// ============================================================
// INTROSPECTION
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeparateRequest {
    pub word_id: WordId,
    /// Only members ranking the word first go to the first part.
    #[serde(default)]
    pub narrow: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventQuery {
    pub id: EventId,
    #[serde(default)]
    pub relation: Option<EventId>,
    /// Member at which the time-sorted event is cut.
    #[serde(default)]
    pub split: Option<MessageId>,
    #[serde(default)]
    pub separate: Option<SeparateRequest>,
}

/// Read-only view of an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventSnapshot {
    pub id: EventId,
    pub lang: Lang,
    pub flags: String,
    pub spin: i32,
    pub messages: Vec<MessageInfo>,
    pub words: Vec<EventWordWeight>,
    pub dissenters: u32,
    pub strain: u32,
    pub hash: u64,
    pub published_min: u64,
    pub published_max: u64,
}

impl From<&Event> for EventSnapshot {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            lang: event.lang,
            flags: event.flags.to_string(),
            spin: event.spin,
            messages: event.messages().to_vec(),
            words: event.words.clone(),
            dissenters: event.dissenters(),
            strain: event.strain(),
            hash: event.hash(),
            published_min: event.published_min,
            published_max: event.published_max,
        }
    }
}

/// What merging an event with another would look like.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationInfo {
    pub event: EventSnapshot,
    pub overlap: u32,
    pub merge_level: u32,
    pub blacklist_timeout: Option<u64>,
    pub merge_result: EventSnapshot,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventParts {
    pub part1: Option<EventSnapshot>,
    pub part2: Option<EventSnapshot>,
    pub merge1: Option<RelationInfo>,
    pub merge2: Option<RelationInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRelation {
    pub event: EventSnapshot,
    /// Waiting for a merge attempt.
    pub changed: bool,
    pub relation: Option<RelationInfo>,
    pub split: Option<EventParts>,
    pub separate: Option<EventParts>,
}
