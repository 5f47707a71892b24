use crate::event::types::{MessageId, WordId};

use std::collections::HashMap;

#[derive(Debug, Clone)]
struct CachedWords {
    words: Vec<WordId>,
    timestamp: u64,
}

/// Ranked core words of event members, evicted after a period without access.
#[derive(Debug, Default)]
pub struct CoreWordCache {
    entries: HashMap<MessageId, CachedWords>,
    next_preempt: u64,
}

impl CoreWordCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &MessageId) -> Option<&[WordId]> {
        self.entries.get(id).map(|c| c.words.as_slice())
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn insert(&mut self, id: MessageId, words: Vec<WordId>, now: u64) {
        self.entries.insert(id, CachedWords { words, timestamp: now });
    }

    pub fn remove(&mut self, id: &MessageId) {
        self.entries.remove(id);
    }

    /// Refreshes the access time; false when the entry is missing.
    pub fn touch(&mut self, id: &MessageId, now: u64) -> bool {
        match self.entries.get_mut(id) {
            Some(cached) => {
                cached.timestamp = now;
                true
            }
            None => false,
        }
    }

    /// Evicts entries idle for `timeout` seconds, at most once per `period`.
    pub fn preempt(&mut self, now: u64, timeout: u64, period: u64) -> usize {
        if now < self.next_preempt {
            return 0;
        }
        self.next_preempt = now + period;

        let threshold = now.saturating_sub(timeout);
        let before = self.entries.len();
        self.entries.retain(|_, cached| cached.timestamp > threshold);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
