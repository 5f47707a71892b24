//! The cluster entity.

use super::overlap::{rank_words, summary_overlap, word_positions};
use super::types::*;

use std::collections::HashMap;
use xxhash_rust::xxh64::xxh64;

/// A set of messages believed to describe the same occurrence, with its derived word
/// summary and dissenter bookkeeping.
///
/// Members are kept sorted by message id so the hash does not depend on insertion order.
#[derive(Debug, Clone, Default)]
pub struct Event {
    pub id: EventId,
    pub lang: Lang,
    pub flags: EventFlags,
    /// Remaining migration hops; the sign is the direction (negative = left).
    pub spin: i32,
    pub words: Vec<EventWordWeight>,
    pub published_min: u64,
    pub published_max: u64,
    messages: Vec<MessageInfo>,
    word_positions: HashMap<WordId, u32>,
    dissenters: u32,
    strain: u32,
    hash: u64,
}

impl Event {
    pub fn new(id: EventId, lang: Lang) -> Self {
        Self {
            id,
            lang,
            ..Default::default()
        }
    }

    pub fn messages(&self) -> &[MessageInfo] {
        &self.messages
    }

    pub fn size(&self) -> usize {
        self.messages.len()
    }

    pub fn set_messages(&mut self, mut messages: Vec<MessageInfo>) {
        messages.sort_by_key(|m| m.id);
        messages.dedup_by_key(|m| m.id);
        self.messages = messages;
        self.calc_strain();
        self.calc_hash();
    }

    pub fn take_messages(&mut self) -> Vec<MessageInfo> {
        let messages = std::mem::take(&mut self.messages);
        self.calc_strain();
        self.calc_hash();
        messages
    }

    pub fn contains_message(&self, id: MessageId) -> bool {
        self.messages.binary_search_by_key(&id, |m| m.id).is_ok()
    }

    /// Marks a member as detached (publish time 0). Returns false for non-members.
    pub fn reset_published(&mut self, id: MessageId) -> bool {
        match self.messages.binary_search_by_key(&id, |m| m.id) {
            Ok(i) => {
                self.messages[i].published = 0;
                self.calc_hash();
                true
            }
            Err(_) => false,
        }
    }

    pub fn dissenters(&self) -> u32 {
        self.dissenters
    }

    pub fn set_dissenters(&mut self, dissenters: u32) {
        self.dissenters = dissenters;
        if dissenters == 0 {
            self.flags.remove(EventFlags::DISSENTERS_CLEANUP);
        }
        self.calc_strain();
    }

    /// Percentage of members that are dissenters.
    pub fn strain(&self) -> u32 {
        self.strain
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn time_range(&self) -> u64 {
        if self.messages.is_empty() {
            0
        } else {
            self.published_max - self.published_min
        }
    }

    /// Range covered by both events together.
    pub fn time_range_with(&self, other: &Event) -> u64 {
        self.published_max.max(other.published_max) - self.published_min.min(other.published_min)
    }

    /// Gap between the two publish ranges, 0 when they intersect.
    pub fn time_diff(&self, other: &Event) -> u64 {
        if self.published_min > other.published_max {
            self.published_min - other.published_max
        } else if other.published_min > self.published_max {
            other.published_min - self.published_max
        } else {
            0
        }
    }

    pub fn set_words(&mut self, weights: &WordWeightMap, max_words: u32, respect_most_frequent: bool) {
        self.words = rank_words(weights, max_words, respect_most_frequent);
        self.word_positions = word_positions(&self.words);
    }

    /// Installs an already ranked summary (as read back from the store).
    pub fn set_ranked_words(&mut self, words: Vec<EventWordWeight>) {
        self.word_positions = word_positions(&words);
        self.words = words;
    }

    pub fn has_word(&self, word_id: WordId) -> bool {
        self.word_positions.contains_key(&word_id)
    }

    /// The summary as an accumulable weight map.
    pub fn word_weights(&self) -> WordWeightMap {
        let mut map = WordWeightMap::with_capacity(self.words.len());
        for w in self.words.iter() {
            let entry = map.entry(w.word_id).or_default();
            entry.weight += w.weight;
            entry.first_count += w.first_count;
        }
        map
    }

    /// Symmetric overlap score in `[0, 100]`.
    pub fn words_overlap(&self, other: &Event) -> u32 {
        if self.words.len() > other.words.len() {
            return other.words_overlap(self);
        }
        summary_overlap(&self.words, &other.word_positions, other.words.len())
    }

    pub fn persistent_flags(&self) -> EventFlags {
        self.flags.persistent()
    }

    fn calc_strain(&mut self) {
        self.strain = if self.messages.is_empty() {
            0
        } else {
            (100.0 * self.dissenters as f64 / self.messages.len() as f64 + 0.5) as u32
        };
    }

    fn calc_hash(&mut self) {
        let mut ids = Vec::with_capacity(self.messages.len() * 8);
        let mut published_min = u64::MAX;
        let mut published_max = 0;

        for mi in self.messages.iter() {
            ids.extend_from_slice(&mi.id.0.to_le_bytes());
            published_min = published_min.min(mi.published);
            published_max = published_max.max(mi.published);
        }

        // Persisted in snapshots, so the algorithm must not change between builds.
        self.hash = xxh64(&ids, 0);
        if self.messages.is_empty() {
            self.published_min = 0;
            self.published_max = 0;
        } else {
            self.published_min = published_min;
            self.published_max = published_max;
        }
    }
}
