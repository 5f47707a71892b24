use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;

/// Identifier of a news message, assigned by the message bank.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// Opaque 128-bit event identity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EventId(pub uuid::Uuid);

impl EventId {
    /// Generates a new random UUID v4-based EventId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Numeric language code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Lang(pub u16);

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lang:{}", self.0)
    }
}

pub type WordId = u32;

/// Stable handle of an event inside a shard's arena.
pub type EventNumber = u32;

/// Event member: message id and publish time (seconds). A publish time of 0 marks a
/// member detached from the event and awaiting cleanup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageInfo {
    pub id: MessageId,
    pub published: u64,
}

/// Compact representation of a message for clustering purposes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageDigest {
    pub id: MessageId,
    pub published: u64,
    pub lang: Lang,
    /// Ranked core words, most salient first.
    pub core_words: Vec<WordId>,
    /// Owning event, filled in on push transfers.
    #[serde(default)]
    pub event_id: Option<EventId>,
}

/// Ownership notification: the event a message belongs to and that event's size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageEvent {
    pub id: MessageId,
    pub event_id: Option<EventId>,
    pub event_capacity: u32,
}

impl MessageEvent {
    pub fn unowned(id: MessageId) -> Self {
        Self {
            id,
            event_id: None,
            event_capacity: 0,
        }
    }
}

/// One entry of an event's ranked word summary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventWordWeight {
    pub word_id: WordId,
    pub weight: u64,
    /// Number of members ranking this word first.
    pub first_count: u32,
}

/// Accumulated weight of a word across event members.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WordWeight {
    pub weight: u64,
    pub first_count: u32,
}

pub type WordWeightMap = HashMap<WordId, WordWeight>;

/// Event state bits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EventFlags(pub u8);

impl EventFlags {
    pub const NONE: EventFlags = EventFlags(0);
    /// Dissenter state freshly recomputed.
    pub const REVISED: EventFlags = EventFlags(0x1);
    /// Eligible for merging.
    pub const CAN_MERGE: EventFlags = EventFlags(0x2);
    /// Strain exceeded the cap at least once.
    pub const DISSENTERS_CLEANUP: EventFlags = EventFlags(0x4);
    /// Migration to a neighbour bank in flight.
    pub const PUSH_IN_PROGRESS: EventFlags = EventFlags(0x20);
    /// Never written to the store.
    pub const MEM_ONLY: EventFlags = EventFlags(0x40);
    /// Needs to be written to the store.
    pub const DIRTY: EventFlags = EventFlags(0x80);

    pub fn contains(self, other: EventFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: EventFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: EventFlags) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: EventFlags, on: bool) {
        if on {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }

    /// Flags that survive a store round trip.
    pub fn persistent(self) -> EventFlags {
        EventFlags(self.0 & !(Self::MEM_ONLY.0 | Self::DIRTY.0 | Self::PUSH_IN_PROGRESS.0))
    }
}

impl BitOr for EventFlags {
    type Output = EventFlags;

    fn bitor(self, rhs: EventFlags) -> EventFlags {
        EventFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for EventFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::REVISED, 'R'),
            (Self::CAN_MERGE, 'M'),
            (Self::DISSENTERS_CLEANUP, 'C'),
            (Self::PUSH_IN_PROGRESS, 'P'),
            (Self::MEM_ONLY, 'O'),
            (Self::DIRTY, 'D'),
        ];
        for (flag, name) in names {
            if self.contains(flag) {
                write!(f, "{}", name)?;
            }
        }
        Ok(())
    }
}

/// Helper to get the current system time in seconds.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
