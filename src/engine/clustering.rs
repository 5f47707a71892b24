//! Insertion, candidate search and merging.

use super::state::ShardState;
use super::types::{DissenterScan, EventPushInfo};
use crate::error::BankResult;
use crate::event::event::Event;
use crate::event::overlap::{add_message_words, message_word_weights};
use crate::event::types::*;
use crate::index::blacklist::HashPair;
use crate::index::changed::EventCardinality;
use crate::storage::codec::{decode_message, encode_message};

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Outcome of a candidate search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BestOverlap {
    /// Best candidate the event may merge with now.
    pub best: Option<EventNumber>,
    /// Better candidate currently denied by the blacklist.
    pub denied: Option<EventNumber>,
}

#[derive(Debug, Clone, Copy)]
pub struct MergeOutcome {
    /// The changed queue was empty when the step started.
    pub idle: bool,
    pub merged: bool,
}

/// Best candidate so far among either the allowed or the denied merges.
struct CandidateGroup {
    max_rel: f64,
    min_time_diff: u64,
    number: Option<EventNumber>,
}

impl CandidateGroup {
    fn new() -> Self {
        Self {
            max_rel: 0.0,
            min_time_diff: u64::MAX,
            number: None,
        }
    }

    /// Higher relative overlap wins; a practically equal one wins on a smaller gap.
    fn improves(&self, rel: f64, time_diff: u64) -> bool {
        rel > self.max_rel || ((self.max_rel - rel).abs() <= 0.001 && time_diff < self.min_time_diff)
    }
}

/// Overlap of two messages' own summaries.
fn message_words_overlap(words1: &[WordId], words2: &[WordId], max_count: u32) -> u32 {
    let mut event1 = Event::default();
    event1.set_words(&message_word_weights(words1, max_count), u32::MAX, false);

    let mut event2 = Event::default();
    event2.set_words(&message_word_weights(words2, max_count), u32::MAX, false);

    event1.words_overlap(&event2)
}

impl ShardState {
    // ============================================================
    // CORE WORDS
    // ============================================================

    /// Makes sure the core words of every member of the events are cached, reading
    /// missing ones from the store. Unreadable rows are deleted.
    pub(crate) fn load_core_words(&mut self, numbers: &[EventNumber], now: u64) -> BankResult<()> {
        let mut missing = Vec::new();

        for number in numbers {
            if let Some(event) = self.index.get(*number) {
                for mi in event.messages() {
                    if !self.cache.touch(&mi.id, now) {
                        missing.push(mi.id);
                    }
                }
            }
        }

        let cache_config = &self.config.event_cache;
        let evicted = self.cache.preempt(
            now,
            cache_config.msg_core_words_timeout,
            cache_config.msg_core_words_preempt_period,
        );
        if evicted > 0 {
            tracing::debug!("Evicted {} idle core-word entries", evicted);
        }

        if missing.is_empty() {
            return Ok(());
        }

        let mut corrupt = Vec::new();
        let chunk_size = self.config.read_chunk_size.max(1) as usize;

        for chunk in missing.chunks(chunk_size) {
            for record in self.store.get_messages(chunk)? {
                match decode_message(&record) {
                    Ok(words) => self.cache.insert(record.id, words, now),
                    Err(e) => {
                        tracing::warn!("Dropping message row: {}", e);
                        corrupt.push(record.id);
                    }
                }
            }
        }

        if !corrupt.is_empty() {
            self.store.delete_messages(&corrupt)?;
        }

        Ok(())
    }

    /// Word weights of the event's cached members. Uncached members are skipped.
    pub(crate) fn cached_weights(&self, event: &Event) -> WordWeightMap {
        let max_count = self.config.event.max_message_core_words;
        let mut weights = WordWeightMap::new();
        for mi in event.messages() {
            if let Some(words) = self.cache.get(&mi.id) {
                add_message_words(&mut weights, words, max_count);
            }
        }
        weights
    }

    /// Builds a detached event over the given members, with summary and dissenters
    /// derived from cached core words.
    pub(crate) fn build_event(&self, id: EventId, lang: Lang, messages: Vec<MessageInfo>) -> Event {
        let mut event = Event::new(id, lang);
        event.set_messages(messages);
        let weights = self.cached_weights(&event);
        event.set_words(&weights, self.config.event.max_core_words, true);
        let scan = self.detach_message_candidate(&event, 0);
        event.set_dissenters(scan.dissenters);
        event
    }

    /// Re-derives the event's summary from its members and re-registers its words.
    /// The caller must have unreferenced the old summary.
    pub(crate) fn set_event_words(&mut self, number: EventNumber) -> BankResult<()> {
        let weights = self.cached_weights(self.index.event(number)?);
        let max_words = self.config.event.max_core_words;
        self.index.event_mut(number)?.set_words(&weights, max_words, true);
        self.index.reference_words(number);
        Ok(())
    }

    // ============================================================
    // DISSENTERS
    // ============================================================

    /// Overlap of one member with the rest of its event. `weights` is the event's
    /// summary as a weight map.
    pub(crate) fn member_overlap(&self, event: &Event, weights: &WordWeightMap, member: MessageId) -> u32 {
        let max_count = self.config.event.max_message_core_words;

        let Some(words) = self.cache.get(&member) else {
            return 0;
        };

        if event.size() == 2 {
            let other = event.messages().iter().find(|mi| mi.id != member);
            return match other.and_then(|mi| self.cache.get(&mi.id)) {
                Some(other_words) => message_words_overlap(words, other_words, max_count),
                None => 0,
            };
        }

        let own = message_word_weights(words, max_count);
        let mut rest = weights.clone();

        for (i, word_id) in words.iter().enumerate() {
            if let Some(entry) = rest.get_mut(word_id) {
                let weight = own.get(word_id).map(|w| w.weight).unwrap_or(0);
                entry.weight = entry.weight.saturating_sub(weight);
                if i == 0 && entry.first_count > 0 {
                    entry.first_count -= 1;
                }
            }
        }

        let mut rest_event = Event::default();
        rest_event.set_words(&rest, u32::MAX, true);

        let mut own_event = Event::default();
        own_event.set_words(&own, u32::MAX, false);

        own_event.words_overlap(&rest_event)
    }

    /// Counts members whose overlap with the rest falls below the event's merge level.
    /// Members published at or before `expire` always count.
    pub(crate) fn detach_message_candidate(&self, event: &Event, expire: u64) -> DissenterScan {
        let mut scan = DissenterScan::default();

        if event.size() <= 1 {
            return scan;
        }

        let weights = event.word_weights();
        let level = self.model.merge_level(event.size(), 0, 0, event.time_range());
        let mut worst: Option<(u32, u64)> = None;

        for mi in event.messages() {
            if mi.published <= expire {
                scan.dissenters += 1;
                continue;
            }

            let overlap = self.member_overlap(event, &weights, mi.id);
            if overlap >= level {
                continue;
            }

            scan.dissenters += 1;

            let better = match worst {
                None => true,
                Some((min_overlap, published)) => {
                    overlap < min_overlap || (overlap == min_overlap && mi.published < published)
                }
            };

            if better {
                worst = Some((overlap, mi.published));
                scan.candidate = Some(mi.id);
            }
        }

        scan
    }

    /// Recomputes the event's dissenters, keeping the shard total in step.
    pub(crate) fn refresh_dissenters(&mut self, number: EventNumber) -> BankResult<DissenterScan> {
        let scan = self.detach_message_candidate(self.index.event(number)?, 0);
        let event = self.index.event_mut(number)?;

        self.dissenters = self.dissenters.saturating_sub(event.dissenters() as u64);
        event.set_dissenters(scan.dissenters);
        self.dissenters += scan.dissenters as u64;

        Ok(scan)
    }

    // ============================================================
    // INSERTION
    // ============================================================

    /// Places fresh digests into singleton events. Returns the owner of every digest in
    /// input order; digests of foreign languages or already expired stay unowned.
    pub fn insert(&mut self, digests: &[MessageDigest], now: u64, save_messages: bool) -> BankResult<Vec<MessageEvent>> {
        let expire = self.expire_time(now);
        let max_words = self.config.event.max_core_words;
        let max_count = self.config.event.max_message_core_words;

        let mut owners = Vec::with_capacity(digests.len());
        let mut rows = Vec::new();

        for digest in digests {
            if !self.langs.contains(&digest.lang) || digest.published <= expire {
                owners.push(MessageEvent::unowned(digest.id));
                continue;
            }

            if let Some(number) = self.index.owner_of(digest.id) {
                let event = self.index.event(number)?;
                owners.push(MessageEvent {
                    id: digest.id,
                    event_id: Some(event.id),
                    event_capacity: event.size() as u32,
                });
                continue;
            }

            self.cache.insert(digest.id, digest.core_words.clone(), now);

            let mut event = Event::new(EventId::new(), digest.lang);
            event.flags = EventFlags::DIRTY | EventFlags::MEM_ONLY | EventFlags::REVISED;
            event.set_messages(vec![MessageInfo {
                id: digest.id,
                published: digest.published,
            }]);

            let mut weights = WordWeightMap::new();
            add_message_words(&mut weights, &digest.core_words, max_count);
            event.set_words(&weights, max_words, true);

            let event_id = event.id;
            let number = self.index.insert(event)?;
            self.queue_if_mergeable(number)?;

            owners.push(MessageEvent {
                id: digest.id,
                event_id: Some(event_id),
                event_capacity: 1,
            });

            if save_messages {
                rows.push(encode_message(digest.id, digest.lang, &digest.core_words)?);
            }
        }

        if !rows.is_empty() {
            self.store.upsert_messages(rows)?;
        }

        Ok(owners)
    }

    /// Adopts whole events pushed by a neighbour bank. Events already known here and
    /// members already owned (or expired) are skipped. Returns the number of events
    /// adopted.
    pub fn accept(&mut self, digests: Vec<MessageDigest>, infos: &[EventPushInfo], now: u64) -> BankResult<usize> {
        let expire = self.expire_time(now);
        let max_words = self.config.event.max_core_words;

        let mut members: HashMap<EventId, Vec<MessageDigest>> = HashMap::new();
        for digest in digests {
            if !self.langs.contains(&digest.lang)
                || digest.published <= expire
                || self.index.owner_of(digest.id).is_some()
            {
                continue;
            }
            if let Some(event_id) = digest.event_id {
                members.entry(event_id).or_default().push(digest);
            }
        }

        let mut rows = Vec::new();
        let mut accepted = 0;

        for info in infos {
            if self.index.number_of(&info.id).is_some() {
                tracing::debug!("Pushed event {} already present", info.id);
                continue;
            }

            let Some(digests) = members.remove(&info.id) else {
                continue;
            };

            let mut event = Event::new(info.id, digests[0].lang);
            event.spin = info.spin;

            let mut flags = EventFlags(info.flags) | EventFlags::DIRTY | EventFlags::MEM_ONLY;
            flags.remove(EventFlags::REVISED);
            event.flags = flags;

            let mut messages = Vec::with_capacity(digests.len());
            for digest in digests.iter() {
                self.cache.insert(digest.id, digest.core_words.clone(), now);
                messages.push(MessageInfo {
                    id: digest.id,
                    published: digest.published,
                });
                rows.push(encode_message(digest.id, digest.lang, &digest.core_words)?);
            }

            event.set_messages(messages);
            let weights = self.cached_weights(&event);
            event.set_words(&weights, max_words, true);
            event.set_dissenters(info.dissenters.min(event.size() as u32));

            self.dissenters += event.dissenters() as u64;
            let number = self.index.insert(event)?;
            self.refresh_dissenters(number)?;
            self.queue_if_mergeable(number)?;
            accepted += 1;
        }

        if !rows.is_empty() {
            self.store.upsert_messages(rows)?;
        }

        Ok(accepted)
    }

    // ============================================================
    // CANDIDATE SEARCH
    // ============================================================

    /// Searches the inverted index for the event the given one should merge with.
    ///
    /// `exclude` is the event's own number (or, for a hypothetical part, its parent's).
    /// Candidates smaller than `min_size` are ignored.
    pub(crate) fn find_best_overlap(
        &mut self,
        event: &Event,
        exclude: Option<EventNumber>,
        now: u64,
        min_size: usize,
    ) -> BankResult<BestOverlap> {
        if !event.flags.contains(EventFlags::CAN_MERGE) {
            return Ok(BestOverlap::default());
        }

        let event_size = event.size();
        let max_size = self.model.max_size as usize;
        let mut seen: HashSet<EventNumber> = exclude.into_iter().collect();
        let mut allowed = CandidateGroup::new();
        let mut denied = CandidateGroup::new();

        // The simulated merges below score every member, own ones included.
        if let Some(own) = exclude {
            self.load_core_words(&[own], now)?;
        }

        for word in event.words.iter() {
            let Some(numbers) = self.index.word_events(word.word_id) else {
                continue;
            };
            let numbers: Vec<EventNumber> = numbers.iter().copied().collect();

            for number in numbers {
                if !seen.insert(number) {
                    continue;
                }

                let Some(candidate) = self.index.get(number) else {
                    continue;
                };

                let candidate_size = candidate.size();
                if candidate_size < min_size {
                    continue;
                }

                let time_diff = event.time_diff(candidate);
                if time_diff > self.model.max_time_diff {
                    continue;
                }

                if candidate.lang != event.lang || !candidate.flags.contains(EventFlags::CAN_MERGE) {
                    continue;
                }

                let time_range = event.time_range_with(candidate);
                if time_range > self.model.max_time_range {
                    continue;
                }

                if event_size > max_size || candidate_size > max_size - event_size {
                    continue;
                }

                let overlap = event.words_overlap(candidate);
                if overlap < self.model.merge_level_min() {
                    continue;
                }

                let level = self.model.merge_level(
                    0,
                    event.strain().max(candidate.strain()),
                    time_diff,
                    time_range,
                );
                if overlap < level {
                    continue;
                }

                let rel = overlap as f64 / level.max(1) as f64;
                let pair = HashPair::new(event.hash(), candidate.hash(), event.lang);
                let merge_allowed = !self.blacklist.is_denied(&pair, now);

                let group = if merge_allowed { &allowed } else { &denied };
                if !group.improves(rel, time_diff) {
                    continue;
                }

                self.load_core_words(&[number], now)?;

                let Some(candidate) = self.index.get(number) else {
                    continue;
                };
                let mut messages = event.messages().to_vec();
                messages.extend_from_slice(candidate.messages());
                let merged = self.build_event(EventId::default(), event.lang, messages);

                let tolerated = merged.strain() <= self.model.max_strain
                    || merged.dissenters() < 2
                    || (merged.dissenters() as usize) < event_size.min(candidate_size);

                if !tolerated {
                    continue;
                }

                let group = if merge_allowed { &mut allowed } else { &mut denied };
                group.max_rel = group.max_rel.max(rel);
                group.min_time_diff = time_diff;

                if merge_allowed {
                    allowed.number = Some(number);
                } else if allowed.number.is_none() {
                    denied.number = Some(number);
                }
            }
        }

        Ok(BestOverlap {
            best: allowed.number,
            denied: if allowed.number.is_some() { None } else { denied.number },
        })
    }

    // ============================================================
    // MERGING
    // ============================================================

    /// Absorbs `src` into `dest`. The pair is denied from merging again for a while.
    pub(crate) fn merge_events(&mut self, src: EventNumber, dest: EventNumber, now: u64) -> BankResult<()> {
        let src_event = self.index.event(src)?;
        let dest_event = self.index.event(dest)?;

        let timeout = now + self.model.deny_timeout(src_event.size(), dest_event.size());
        let pair = HashPair::new(src_event.hash(), dest_event.hash(), src_event.lang);
        self.blacklist.deny(pair, timeout);

        self.load_core_words(&[src, dest], now)?;

        self.index.unreference_words(src);
        self.index.unreference_words(dest);

        let src_messages = self.index.event(src)?.messages().to_vec();
        for mi in src_messages.iter() {
            self.index.set_owner(mi.id, dest);
        }

        let dest_event = self.index.event_mut(dest)?;
        let mut messages = dest_event.messages().to_vec();
        messages.extend(src_messages);
        dest_event.set_messages(messages);

        self.set_event_words(dest)?;
        self.refresh_dissenters(dest)?;

        let dest_event = self.index.event_mut(dest)?;
        dest_event.flags.insert(EventFlags::DIRTY);
        dest_event.flags.remove(EventFlags::REVISED);
        self.note_members(dest)?;

        let removed = self.index.remove(src)?;
        self.dissenters = self.dissenters.saturating_sub(removed.dissenters() as u64);
        self.changed.remove(&removed.id);

        if !removed.flags.contains(EventFlags::MEM_ONLY) {
            self.store.delete_events(&[removed.id])?;
        }

        tracing::trace!("Merged {} into {}", removed.id, self.index.event(dest)?.id);

        self.queue_if_mergeable(dest)?;
        Ok(())
    }

    /// Re-queues events that wanted a merge while it was denied, once the denial has
    /// expired and the event still has the shape it had then.
    fn sweep_blacklist(&mut self, now: u64) {
        if !self
            .blacklist
            .cleanup_due(now, self.config.event_cache.merge_blacklist_cleanup_period)
        {
            return;
        }

        let expired = self.blacklist.take_expired(now);
        let mut requeued = 0;

        for (pair, denial) in expired.iter() {
            if let Some(event_id) = denial.event_id
                && let Some(number) = self.index.number_of(&event_id)
                && let Some(event) = self.index.get(number)
                && event.flags.contains(EventFlags::CAN_MERGE)
                && event.dissenters() == 0
                && pair.matches(event.hash())
            {
                self.changed.insert(EventCardinality::of(event));
                requeued += 1;
            }
        }

        tracing::debug!(
            "Merge blacklist sweep: {} expired, {} events re-queued, {} left",
            expired.len(),
            requeued,
            self.blacklist.len()
        );
    }

    /// One merge step: pops changed events until one merges or the scan budget is
    /// spent.
    pub fn merge_step(&mut self, now: u64) -> BankResult<MergeOutcome> {
        self.sweep_blacklist(now);

        let idle = self.changed.is_empty();
        let budget = Duration::from_millis(self.config.event_cache.find_best_overlap_timeout);
        let mut spent = Duration::ZERO;
        let mut merged = false;

        while spent < budget
            && let Some(cardinality) = self.changed.pop()
        {
            let Some(number) = self.index.number_of(&cardinality.id) else {
                continue;
            };

            let event = self.index.event(number)?.clone();

            let started = Instant::now();
            let found = self.find_best_overlap(&event, Some(number), now, 1)?;
            spent += started.elapsed();

            if let Some(best) = found.best {
                let candidate_size = self.index.event(best)?.size();
                let (src, dest) = if event.size() < candidate_size {
                    (number, best)
                } else {
                    (best, number)
                };
                self.merge_events(src, dest, now)?;
                merged = true;
                break;
            }

            if let Some(denied) = found.denied {
                let candidate = self.index.event(denied)?;
                let pair = HashPair::new(event.hash(), candidate.hash(), event.lang);
                self.blacklist.record_offender(&pair, event.id);
            }
        }

        Ok(MergeOutcome { idle, merged })
    }
}
