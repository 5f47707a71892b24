//! Recomposition: split, separate, remake and dissenter revision.
//!
//! All of them end in `detach_event`, which moves part of an event's members into a
//! new event and re-derives both sides.

use super::state::ShardState;
use crate::error::BankResult;
use crate::event::event::Event;
use crate::event::types::*;
use crate::index::blacklist::HashPair;

use std::collections::{BTreeSet, HashMap, HashSet};

/// Counters of one revision pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReviseSummary {
    /// Events found without dissenters and marked revised.
    pub revised: usize,
    /// Events split or separated.
    pub recomposed: usize,
    pub remade: usize,
    /// Members cut loose and re-inserted as singletons.
    pub detached: usize,
}

/// Partition chosen by `remake`.
struct RemakePlan {
    new: Vec<MessageInfo>,
    old: Vec<MessageInfo>,
    candidate: Option<EventNumber>,
}

impl ShardState {
    /// Members of the event, or `None` when one of them is expired or has no cached
    /// core words.
    fn live_cached_members(&self, event: &Event, expire: u64) -> Option<Vec<MessageInfo>> {
        event
            .messages()
            .iter()
            .map(|mi| (mi.published > expire && self.cache.contains(&mi.id)).then_some(*mi))
            .collect()
    }

    fn contains_word(&self, id: MessageId, word_id: WordId, first_only: bool) -> bool {
        match self.cache.get(&id) {
            Some(words) if first_only => words.first() == Some(&word_id),
            Some(words) => words.contains(&word_id),
            None => false,
        }
    }

    /// Moves `new_messages` out of the event into a new one; the event keeps
    /// `old_messages`. Both sides are re-derived and queued for merging when eligible.
    /// Returns the new event's number.
    pub(crate) fn detach_event(
        &mut self,
        number: EventNumber,
        new_messages: Vec<MessageInfo>,
        old_messages: Vec<MessageInfo>,
        changed_set: &mut BTreeSet<EventNumber>,
    ) -> BankResult<EventNumber> {
        let parent = self.index.event(number)?;
        let lang = parent.lang;
        let inherited = if parent.flags.contains(EventFlags::DISSENTERS_CLEANUP) {
            EventFlags::DISSENTERS_CLEANUP
        } else {
            EventFlags::NONE
        };

        self.index.unreference_words(number);

        let mut child = Event::new(EventId::new(), lang);
        child.flags = EventFlags::DIRTY | EventFlags::MEM_ONLY | inherited;
        child.set_messages(new_messages);
        let weights = self.cached_weights(&child);
        child.set_words(&weights, self.config.event.max_core_words, true);

        let child_number = self.index.insert(child)?;
        self.refresh_dissenters(child_number)?;
        self.queue_if_mergeable(child_number)?;

        let parent = self.index.event_mut(number)?;
        parent.flags.insert(EventFlags::DIRTY);
        parent.set_messages(old_messages);
        self.set_event_words(number)?;
        self.refresh_dissenters(number)?;
        self.queue_if_mergeable(number)?;

        self.note_members(child_number)?;
        self.note_members(number)?;

        changed_set.insert(number);
        changed_set.insert(child_number);

        Ok(child_number)
    }

    // ============================================================
    // SPLIT
    // ============================================================

    /// Cuts the event at the time rift whose two sides overlap least relative to their
    /// merge level, provided the cut lowers the dissenter count. The smaller side is
    /// detached.
    pub(crate) fn split(
        &mut self,
        number: EventNumber,
        expire: u64,
        changed_set: &mut BTreeSet<EventNumber>,
    ) -> BankResult<bool> {
        let event = self.index.event(number)?;
        if event.size() < 4 {
            return Ok(false);
        }

        let Some(mut sorted) = self.live_cached_members(event, expire) else {
            return Ok(false);
        };
        sorted.sort_by_key(|mi| (mi.published, mi.id));

        let mut min_rel = 101.0;
        let mut max_gap = 0;
        let mut rift = None;

        for i in 2..sorted.len() - 1 {
            let gap = sorted[i].published - sorted[i - 1].published;
            if gap < self.model.min_rift_time {
                continue;
            }

            let part1 = self.build_event(EventId::default(), event.lang, sorted[..i].to_vec());
            let part2 = self.build_event(EventId::default(), event.lang, sorted[i..].to_vec());

            if event.dissenters() <= part1.dissenters() + part2.dissenters() {
                continue;
            }

            let overlap = if gap > self.model.max_time_diff {
                0
            } else {
                part1.words_overlap(&part2)
            };

            let rel = if overlap > 0 {
                let level = self.model.merge_level(
                    0,
                    part1.strain().max(part2.strain()),
                    gap,
                    part1.time_range_with(&part2),
                );
                if overlap >= level {
                    continue;
                }
                overlap as f64 / level.max(1) as f64
            } else {
                0.0
            };

            if rel < min_rel || ((rel - min_rel).abs() <= 0.001 && gap > max_gap) {
                if rel < min_rel {
                    min_rel = rel;
                }
                max_gap = gap;
                rift = Some(i);
            }
        }

        let Some(i) = rift else {
            return Ok(false);
        };

        let part2 = sorted.split_off(i);
        let part1 = sorted;
        let (new, old) = if part1.len() < part2.len() {
            (part1, part2)
        } else {
            (part2, part1)
        };

        let child = self.detach_event(number, new, old, changed_set)?;
        tracing::debug!(
            "Split {} at a {}s rift, detached {}",
            self.index.event(number)?.id,
            max_gap,
            self.index.event(child)?.id
        );

        Ok(true)
    }

    // ============================================================
    // SEPARATE
    // ============================================================

    /// Partitions the event by presence of one of its leading words, choosing the most
    /// balanced partition whose sides stay below their mutual merge level. The smaller
    /// side is detached.
    pub(crate) fn separate(
        &mut self,
        number: EventNumber,
        expire: u64,
        changed_set: &mut BTreeSet<EventNumber>,
    ) -> BankResult<bool> {
        let event = self.index.event(number)?;
        if event.size() < 4 {
            return Ok(false);
        }

        let Some(members) = self.live_cached_members(event, expire) else {
            return Ok(false);
        };

        let max_strain = self.model.max_strain;
        let mut best: Option<(Vec<MessageInfo>, Vec<MessageInfo>)> = None;
        let mut best_min_side = 0;

        for word in event.words.iter().filter(|w| w.first_count > 0) {
            let (msgs1, msgs2): (Vec<MessageInfo>, Vec<MessageInfo>) = members
                .iter()
                .partition(|mi| self.contains_word(mi.id, word.word_id, false));

            let min_side = msgs1.len().min(msgs2.len());
            if min_side < 2 || min_side <= best_min_side {
                continue;
            }

            let part1 = self.build_event(EventId::default(), event.lang, msgs1.clone());
            let part2 = self.build_event(EventId::default(), event.lang, msgs2.clone());

            let proper = (part1.strain() <= max_strain && part2.strain() <= max_strain)
                || part1.dissenters() + part2.dissenters() < event.dissenters();
            if !proper {
                continue;
            }

            let level = self.model.merge_level(
                0,
                0,
                part1.time_diff(&part2),
                part1.time_range_with(&part2),
            );
            if part1.words_overlap(&part2) >= level {
                continue;
            }

            best_min_side = min_side;
            best = Some((msgs1, msgs2));
        }

        let Some((msgs1, msgs2)) = best else {
            return Ok(false);
        };

        let (new, old) = if msgs1.len() < msgs2.len() {
            (msgs1, msgs2)
        } else {
            (msgs2, msgs1)
        };

        let detached = new.len();
        self.detach_event(number, new, old, changed_set)?;
        tracing::debug!(
            "Separated {} members from {}",
            detached,
            self.index.event(number)?.id
        );

        Ok(true)
    }

    // ============================================================
    // REMAKE
    // ============================================================

    /// Looks for an event that `part` would fit markedly better than it fits `other`,
    /// its complement within the parent. Returns the candidate when its improvement
    /// score beats `max_score`, which is raised accordingly.
    #[allow(clippy::too_many_arguments)]
    fn find_remake_candidate(
        &mut self,
        part: &Event,
        other: &Event,
        parent: EventNumber,
        rel: f64,
        is_event_word: bool,
        max_score: &mut f64,
        now: u64,
    ) -> BankResult<Option<EventNumber>> {
        let remake = &self.config.event_remake;
        let min_part = remake.min_part as usize;
        let min_improve = remake.min_improve;
        let log_offset = remake.improve_log_offset;
        let word_boost = remake.event_word_boost;

        let found = self.find_best_overlap(part, Some(parent), now, min_part)?;
        let Some(number) = found.best else {
            return Ok(None);
        };

        let candidate = self.index.event(number)?;
        let level = self.model.merge_level(
            0,
            part.strain().max(candidate.strain()),
            part.time_diff(candidate),
            part.time_range_with(candidate),
        );

        let candidate_rel = part.words_overlap(candidate) as f64 / level.max(1) as f64;
        let rel = rel.max(0.001);

        if candidate_rel <= rel {
            return Ok(None);
        }

        let improvement = (candidate_rel - rel) / rel;
        if ((improvement * 100.0).round() as u32) < min_improve {
            return Ok(None);
        }

        let limiting = part.size().min(other.size()).min(candidate.size());
        let mut score = improvement * (limiting as f64 + log_offset).ln();
        if is_event_word {
            score *= word_boost;
        }

        if score > *max_score {
            *max_score = score;
            Ok(Some(number))
        } else {
            Ok(None)
        }
    }

    /// Local re-optimization: splits the event by the presence of one word and, when a
    /// part fits a neighbouring event markedly better, moves it there.
    pub(crate) fn remake(&mut self, number: EventNumber, min_size: usize, now: u64) -> BankResult<bool> {
        if self.index.event(number)?.size() < min_size.max(2) {
            return Ok(false);
        }

        self.load_core_words(&[number], now)?;

        let event = self.index.event(number)?.clone();
        let Some(members) = self.live_cached_members(&event, 0) else {
            return Ok(false);
        };

        let remake = self.config.event_remake.clone();
        let min_part = remake.min_part as usize;

        let mut words: Vec<(WordId, bool)> = Vec::new();
        let mut known: HashMap<WordId, bool> = HashMap::new();

        for word in event.words.iter() {
            if known.insert(word.word_id, true).is_none() {
                words.push((word.word_id, true));
            }
        }
        for mi in members.iter() {
            if let Some(core_words) = self.cache.get(&mi.id) {
                for word_id in core_words.iter().take(remake.max_message_word_check as usize) {
                    if !known.contains_key(word_id) {
                        known.insert(*word_id, false);
                        words.push((*word_id, false));
                    }
                }
            }
        }

        let mut skip: HashSet<u64> = HashSet::new();
        let mut plan: Option<RemakePlan> = None;
        let mut max_score = 0.0;
        let mut min_rel = 1.1;

        for (word_id, is_event_word) in words {
            let (msgs1, msgs2): (Vec<MessageInfo>, Vec<MessageInfo>) = members
                .iter()
                .partition(|mi| self.contains_word(mi.id, word_id, false));

            if msgs1.len().min(msgs2.len()) < min_part {
                continue;
            }

            let mut part1 = self.build_event(EventId::default(), event.lang, msgs1.clone());
            if !skip.insert(part1.hash()) {
                continue;
            }
            let mut part2 = self.build_event(EventId::default(), event.lang, msgs2.clone());
            if !skip.insert(part2.hash()) {
                continue;
            }

            if part1.strain() > self.model.max_strain || part2.strain() > self.model.max_strain {
                continue;
            }

            if self
                .blacklist
                .contains(&HashPair::new(part1.hash(), part2.hash(), event.lang))
            {
                continue;
            }

            part1.flags.insert(EventFlags::CAN_MERGE);
            part2.flags.insert(EventFlags::CAN_MERGE);

            let level = self.model.merge_level(
                0,
                0,
                part1.time_diff(&part2),
                part1.time_range_with(&part2),
            );
            let overlap = part1.words_overlap(&part2);
            let rel = overlap as f64 / level.max(1) as f64;

            let mut improved = false;

            if let Some(candidate) =
                self.find_remake_candidate(&part1, &part2, number, rel, is_event_word, &mut max_score, now)?
            {
                plan = Some(RemakePlan {
                    new: msgs1.clone(),
                    old: msgs2.clone(),
                    candidate: Some(candidate),
                });
                improved = true;
            }

            if let Some(candidate) =
                self.find_remake_candidate(&part2, &part1, number, rel, is_event_word, &mut max_score, now)?
            {
                plan = Some(RemakePlan {
                    new: msgs2.clone(),
                    old: msgs1.clone(),
                    candidate: Some(candidate),
                });
                improved = true;
            }

            let has_candidate = plan.as_ref().is_some_and(|p| p.candidate.is_some());
            if !improved && !has_candidate && overlap < level && min_rel > rel {
                min_rel = rel;
                plan = Some(RemakePlan {
                    new: msgs1,
                    old: msgs2,
                    candidate: None,
                });
            }
        }

        let Some(plan) = plan else {
            return Ok(false);
        };

        if remake.dry_run {
            tracing::debug!(
                "Remake of {} would detach {} members (dry run)",
                event.id,
                plan.new.len()
            );
            return Ok(true);
        }

        let mut changed_set = BTreeSet::new();
        let child = self.detach_event(number, plan.new, plan.old, &mut changed_set)?;

        let parent_event = self.index.event(number)?;
        let child_event = self.index.event(child)?;
        let timeout = now + self.model.deny_timeout(parent_event.size(), child_event.size());
        self.blacklist.deny(
            HashPair::new(parent_event.hash(), child_event.hash(), event.lang),
            timeout,
        );

        self.flush(&changed_set)?;

        match plan.candidate {
            Some(candidate) if self.index.contains(candidate) => {
                let candidate_id = self.index.event(candidate)?.id;
                self.merge_events(child, candidate, now)?;

                let parent_event = self.index.event(number)?;
                let merged = self.index.event(candidate)?;
                let timeout = now + self.model.deny_timeout(parent_event.size(), merged.size());
                self.blacklist.deny(
                    HashPair::new(parent_event.hash(), merged.hash(), event.lang),
                    timeout,
                );

                tracing::debug!("Remade {}: moved a part into {}", event.id, candidate_id);
            }
            _ => {
                tracing::debug!("Remade {}: detached a part", event.id);
            }
        }

        Ok(true)
    }

    // ============================================================
    // REVISION
    // ============================================================

    /// Recomputes the event's dissenters. With none left the event is marked revised
    /// and `true` is returned. Otherwise the worst member (both members of a pair) is
    /// cut loose: its publish time drops to 0 and its digest is collected for
    /// re-insertion as a singleton.
    pub(crate) fn revise_event(
        &mut self,
        number: EventNumber,
        revised: &mut BTreeSet<EventNumber>,
        detached: &mut Vec<MessageDigest>,
    ) -> BankResult<bool> {
        let scan = self.refresh_dissenters(number)?;

        if scan.dissenters == 0 {
            let event = self.index.event_mut(number)?;
            self.model.set_merge(event);
            event.flags.insert(EventFlags::REVISED);
            return Ok(true);
        }

        let event = self.index.event(number)?;
        let mut cut: Vec<MessageInfo> = Vec::new();

        if let Some(candidate) = scan.candidate
            && let Some(mi) = event.messages().iter().find(|mi| mi.id == candidate)
        {
            cut.push(*mi);
            if event.size() == 2 {
                cut.extend(
                    event
                        .messages()
                        .iter()
                        .filter(|other| other.id != candidate && other.published != 0),
                );
            }
        }

        for mi in cut.iter() {
            if let Some(words) = self.cache.get(&mi.id) {
                detached.push(MessageDigest {
                    id: mi.id,
                    published: mi.published,
                    lang: event.lang,
                    core_words: words.to_vec(),
                    event_id: Some(event.id),
                });
            }
        }

        let event = self.index.event_mut(number)?;
        for mi in cut.iter() {
            event.reset_published(mi.id);
        }
        event.flags.insert(EventFlags::DIRTY);
        event.flags.remove(EventFlags::CAN_MERGE);
        revised.insert(number);

        Ok(false)
    }

    /// Revision pass over the given events: fresh events are first offered to split and
    /// separate; the rest get their dissenters revised, and detached members come back
    /// as singletons.
    pub(crate) fn revise_events(&mut self, numbers: &[EventNumber], now: u64, expire: u64) -> BankResult<ReviseSummary> {
        let mut summary = ReviseSummary::default();
        if numbers.is_empty() {
            return Ok(summary);
        }

        self.load_core_words(numbers, now)?;

        let recompose_since = now.saturating_sub(self.config.event_cache.recompose_timeout);
        let min_size_revise = self.config.event_remake.min_size_revise as usize;

        let mut changed_set = BTreeSet::new();
        let mut revised = BTreeSet::new();
        let mut detached = Vec::new();

        for number in numbers.iter().copied() {
            let Some(event) = self.index.get(number) else {
                continue;
            };
            let fresh = event.published_max > recompose_since;

            if fresh
                && (self.split(number, expire, &mut changed_set)?
                    || self.separate(number, expire, &mut changed_set)?)
            {
                summary.recomposed += 1;
                continue;
            }

            if self.revise_event(number, &mut revised, &mut detached)? {
                summary.revised += 1;
                if fresh && self.remake(number, min_size_revise, now)? {
                    summary.remade += 1;
                }
            }
        }

        self.flush(&changed_set)?;

        self.cleanup_obsolete(&revised, 0, false)?;
        self.flush(&revised)?;

        summary.detached = detached.len();
        if !detached.is_empty() {
            let owners = self.insert(&detached, now, false)?;
            for owner in owners {
                self.note_update(owner);
            }
        }

        Ok(summary)
    }
}
