//! Merge-Denial Blacklist
//!
//! Remembers, for a while, that two event shapes were already merged or separated so
//! the engine does not thrash between them. Keyed by the unordered pair of event hashes,
//! so an entry stops matching as soon as either event's membership changes.

use crate::event::types::{EventId, Lang};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unordered pair of event hashes; `hash1` is the smaller one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct HashPair {
    pub hash1: u64,
    pub hash2: u64,
    pub lang: Lang,
}

impl HashPair {
    pub fn new(a: u64, b: u64, lang: Lang) -> Self {
        Self {
            hash1: a.min(b),
            hash2: a.max(b),
            lang,
        }
    }

    pub fn matches(&self, hash: u64) -> bool {
        self.hash1 == hash || self.hash2 == hash
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeDenial {
    /// Seconds since epoch after which the pair may merge again.
    pub timeout: u64,
    /// Event that wanted the merge while it was denied; re-queued on expiry.
    pub event_id: Option<EventId>,
}

#[derive(Debug, Default)]
pub struct MergeBlacklist {
    entries: HashMap<HashPair, MergeDenial>,
    next_cleanup: u64,
}

impl MergeBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Denies the pair until `timeout`, forgetting any recorded offender.
    pub fn deny(&mut self, pair: HashPair, timeout: u64) {
        self.entries.insert(
            pair,
            MergeDenial {
                timeout,
                event_id: None,
            },
        );
    }

    pub fn insert(&mut self, pair: HashPair, denial: MergeDenial) {
        self.entries.insert(pair, denial);
    }

    pub fn get(&self, pair: &HashPair) -> Option<&MergeDenial> {
        self.entries.get(pair)
    }

    pub fn contains(&self, pair: &HashPair) -> bool {
        self.entries.contains_key(pair)
    }

    /// True while an unexpired entry exists for the pair.
    pub fn is_denied(&self, pair: &HashPair, now: u64) -> bool {
        self.entries.get(pair).is_some_and(|d| d.timeout >= now)
    }

    /// Remembers which event wanted the denied merge, so it is re-queued on expiry.
    pub fn record_offender(&mut self, pair: &HashPair, event_id: EventId) {
        if let Some(denial) = self.entries.get_mut(pair) {
            denial.event_id = Some(event_id);
        }
    }

    /// Returns true once per `period` seconds.
    pub fn cleanup_due(&mut self, now: u64, period: u64) -> bool {
        if now < self.next_cleanup {
            return false;
        }
        self.next_cleanup = now + period;
        true
    }

    /// Removes and returns the entries expired at `now`.
    pub fn take_expired(&mut self, now: u64) -> Vec<(HashPair, MergeDenial)> {
        let expired: Vec<HashPair> = self
            .entries
            .iter()
            .filter(|(_, denial)| denial.timeout < now)
            .map(|(pair, _)| *pair)
            .collect();

        expired
            .into_iter()
            .filter_map(|pair| self.entries.remove(&pair).map(|denial| (pair, denial)))
            .collect()
    }

    pub fn drain(&mut self) -> Vec<(HashPair, MergeDenial)> {
        self.entries.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
