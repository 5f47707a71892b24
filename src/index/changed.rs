//! Changed-Events Priority Queue
//!
//! Events waiting for a merge attempt, smallest first (ties: most recent first, then
//! id), so light and fresh events are evaluated before heavy ones.

use crate::event::event::Event;
use crate::event::types::{EventId, Lang};

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventCardinality {
    pub size: u32,
    /// Latest member publish time.
    pub published: u64,
    pub id: EventId,
    /// Lets a snapshot be split back per shard.
    pub lang: Lang,
}

impl EventCardinality {
    pub fn of(event: &Event) -> Self {
        Self {
            size: event.size() as u32,
            published: event.published_max,
            id: event.id,
            lang: event.lang,
        }
    }
}

impl Ord for EventCardinality {
    fn cmp(&self, other: &Self) -> Ordering {
        self.size
            .cmp(&other.size)
            .then(other.published.cmp(&self.published))
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for EventCardinality {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct ChangedEvents {
    order: BTreeSet<EventCardinality>,
    by_id: HashMap<EventId, EventCardinality>,
}

impl ChangedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the event, replacing a stale entry for the same id.
    pub fn insert(&mut self, cardinality: EventCardinality) {
        if let Some(old) = self.by_id.insert(cardinality.id, cardinality) {
            self.order.remove(&old);
        }
        self.order.insert(cardinality);
    }

    pub fn pop(&mut self) -> Option<EventCardinality> {
        let first = self.order.pop_first()?;
        self.by_id.remove(&first.id);
        Some(first)
    }

    pub fn remove(&mut self, id: &EventId) -> bool {
        match self.by_id.remove(id) {
            Some(old) => {
                self.order.remove(&old);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Drains everything in priority order.
    pub fn drain(&mut self) -> Vec<EventCardinality> {
        self.by_id.clear();
        std::mem::take(&mut self.order).into_iter().collect()
    }
}

impl FromIterator<EventCardinality> for ChangedEvents {
    fn from_iter<I: IntoIterator<Item = EventCardinality>>(iter: I) -> Self {
        let mut changed = ChangedEvents::new();
        for cardinality in iter {
            changed.insert(cardinality);
        }
        changed
    }
}
