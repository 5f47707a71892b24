//! Maintenance: loading, the traversal sweep, obsolete cleanup and flushing.

use super::recompose::ReviseSummary;
use super::state::{LoadStage, ShardState};
use super::types::ShardSnapshot;
use crate::error::{BankError, BankResult};
use crate::event::types::*;
use crate::index::changed::EventCardinality;
use crate::storage::codec::{decode_event, encode_event};

use rand::Rng;
use std::collections::BTreeSet;
use std::time::Duration;

/// Work selected by one traversal pass.
#[derive(Debug, Default)]
pub struct TraversePass {
    /// Events marked push-in-progress, to be shipped to the neighbours.
    pub push: Vec<EventNumber>,
    /// Events that had obsolete members dropped.
    pub obsolete: usize,
    pub flushed: usize,
    pub revise: ReviseSummary,
    /// Delay before the next pass.
    pub next_delay: Duration,
}

impl ShardState {
    // ============================================================
    // LOADING
    // ============================================================

    /// Reads one chunk of persisted events (or, once those are exhausted, of message
    /// rows, deleting the ones no event owns). Returns true when loading is complete.
    pub fn load_chunk(&mut self, now: u64) -> BankResult<bool> {
        match self.load.stage {
            LoadStage::Events => {
                if self.load_events_chunk(now)? {
                    self.load.stage = LoadStage::OrphanMessages;
                }
                Ok(false)
            }
            LoadStage::OrphanMessages => {
                if self.delete_orphan_messages_chunk()? {
                    self.load.stage = LoadStage::Done;
                    return Ok(true);
                }
                Ok(false)
            }
            LoadStage::Done => Ok(true),
        }
    }

    fn load_events_chunk(&mut self, now: u64) -> BankResult<bool> {
        let chunk_size = self.config.read_chunk_size as usize;
        let records = self
            .store
            .load_events(&self.langs, self.load.last_event, chunk_size)?;

        let mut broken = Vec::new();
        let mut loaded = 0;
        let mut detached_members = 0;

        for record in records.iter() {
            self.load.last_event = Some(record.id);

            if self.index.number_of(&record.id).is_some() {
                continue;
            }

            let event = match decode_event(record) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("Dropping event row: {}", e);
                    broken.push(record.id);
                    continue;
                }
            };

            if let Some(mi) = event
                .messages()
                .iter()
                .find(|mi| self.index.owner_of(mi.id).is_some())
            {
                tracing::warn!(
                    "Dropping event row {}: message {} already owned",
                    record.id,
                    mi.id
                );
                broken.push(record.id);
                continue;
            }

            detached_members += event.messages().iter().filter(|mi| mi.published == 0).count();

            let number = self.index.insert(event)?;

            if self.full_rebuild {
                self.rebuild_event(number, now)?;
            }

            self.dissenters += self.index.event(number)?.dissenters() as u64;
            loaded += 1;
        }

        if !broken.is_empty() {
            self.store.delete_events(&broken)?;
        }

        tracing::debug!(
            "Loaded {} events ({} broken, {} detached members)",
            loaded,
            broken.len(),
            detached_members
        );

        Ok(records.len() < chunk_size)
    }

    /// Re-derives a freshly loaded event from its members' core words.
    fn rebuild_event(&mut self, number: EventNumber, now: u64) -> BankResult<()> {
        self.load_core_words(&[number], now)?;

        self.index.unreference_words(number);
        self.set_event_words(number)?;

        let scan = self.detach_message_candidate(self.index.event(number)?, 0);
        let event = self.index.event_mut(number)?;
        event.flags.remove(EventFlags::REVISED);
        event.set_dissenters(scan.dissenters);
        event.flags.insert(EventFlags::DIRTY);

        self.queue_if_mergeable(number)?;
        Ok(())
    }

    fn delete_orphan_messages_chunk(&mut self) -> BankResult<bool> {
        let chunk_size = self.config.read_chunk_size as usize;
        let records = self
            .store
            .load_messages(&self.langs, self.load.last_message, chunk_size)?;

        let orphans: Vec<MessageId> = records
            .iter()
            .map(|record| record.id)
            .filter(|id| self.index.owner_of(*id).is_none())
            .collect();

        if let Some(last) = records.last() {
            self.load.last_message = Some(last.id);
        }

        if !orphans.is_empty() {
            self.store.delete_messages(&orphans)?;
            tracing::debug!("Deleted {} orphan message rows", orphans.len());
        }

        Ok(records.len() < chunk_size)
    }

    // ============================================================
    // DELETION & CLEANUP
    // ============================================================

    /// Marks the members detached; the next traversal's obsolete cleanup removes them.
    pub fn delete_messages(&mut self, ids: &[MessageId]) -> BankResult<usize> {
        let mut count = 0;

        for id in ids {
            let Some(number) = self.index.owner_of(*id) else {
                continue;
            };

            let event = self.index.event_mut(number)?;
            if !event.reset_published(*id) {
                return Err(BankError::invariant(format!(
                    "message {} owned by {} but not a member",
                    id, event.id
                )));
            }
            event.flags.insert(EventFlags::DIRTY);
            event.flags.remove(EventFlags::REVISED);
            event.flags.remove(EventFlags::CAN_MERGE);
            count += 1;
        }

        Ok(count)
    }

    /// Drops members published at or before `expire`. An emptied event is deleted,
    /// otherwise it is re-derived and re-queued.
    pub(crate) fn cleanup_event(&mut self, number: EventNumber, expire: u64, delete_messages: bool) -> BankResult<()> {
        let event = self.index.event(number)?;
        let event_id = event.id;
        let mem_only = event.flags.contains(EventFlags::MEM_ONLY);

        let (kept, removed): (Vec<MessageInfo>, Vec<MessageInfo>) =
            event.messages().iter().partition(|mi| mi.published > expire);

        if removed.is_empty() {
            return Ok(());
        }

        let removed_ids: Vec<MessageId> = removed.iter().map(|mi| mi.id).collect();
        let new_size = kept.len() as u32;

        for id in removed_ids.iter() {
            if self.index.owner_of(*id) == Some(number) {
                self.index.clear_owner(*id);
            }
            self.note_update(MessageEvent::unowned(*id));
        }

        if delete_messages {
            self.store.delete_messages(&removed_ids)?;
        }

        if new_size > 0 {
            for mi in kept.iter() {
                self.note_update(MessageEvent {
                    id: mi.id,
                    event_id: Some(event_id),
                    event_capacity: new_size,
                });
            }

            self.index.unreference_words(number);
            let event = self.index.event_mut(number)?;
            event.set_messages(kept);
            self.set_event_words(number)?;
            self.refresh_dissenters(number)?;

            let event = self.index.event_mut(number)?;
            event.flags.insert(EventFlags::DIRTY);
            event.flags.remove(EventFlags::REVISED);
            self.queue_if_mergeable(number)?;
        } else {
            if !mem_only {
                self.store.delete_events(&[event_id])?;
            }
            let removed_event = self.index.remove(number)?;
            self.dissenters = self.dissenters.saturating_sub(removed_event.dissenters() as u64);
            self.changed.remove(&event_id);
        }

        for id in removed_ids.iter() {
            self.cache.remove(id);
        }

        Ok(())
    }

    /// `cleanup_event` over every listed event that is still live.
    pub(crate) fn cleanup_obsolete(
        &mut self,
        numbers: &BTreeSet<EventNumber>,
        expire: u64,
        delete_messages: bool,
    ) -> BankResult<()> {
        for number in numbers.iter() {
            if self.index.contains(*number) {
                self.cleanup_event(*number, expire, delete_messages)?;
            }
        }
        Ok(())
    }

    /// Writes the dirty events among `numbers` to the store. Returns how many were
    /// written.
    pub(crate) fn flush(&mut self, numbers: &BTreeSet<EventNumber>) -> BankResult<usize> {
        let mut records = Vec::new();
        let mut written = Vec::new();

        for number in numbers.iter() {
            if let Some(event) = self.index.get(*number)
                && event.flags.contains(EventFlags::DIRTY)
            {
                records.push(encode_event(event)?);
                written.push(*number);
            }
        }

        if records.is_empty() {
            return Ok(0);
        }

        self.store.upsert_events(records)?;

        for number in written.iter() {
            if let Some(event) = self.index.get_mut(*number) {
                event.flags.remove(EventFlags::MEM_ONLY);
                event.flags.remove(EventFlags::DIRTY);
            }
        }

        Ok(written.len())
    }

    /// Writes every dirty event.
    pub fn flush_dirty(&mut self) -> BankResult<usize> {
        let dirty: BTreeSet<EventNumber> = self
            .index
            .events()
            .filter(|(_, event)| event.flags.contains(EventFlags::DIRTY))
            .map(|(number, _)| *number)
            .collect();
        self.flush(&dirty)
    }

    // ============================================================
    // TRAVERSAL
    // ============================================================

    /// One slice of the maintenance sweep: up to `traverse_records` events are checked
    /// for obsolete members, revision, flushing and migration.
    pub fn traverse(&mut self, now: u64, has_neighbour: bool) -> BankResult<TraversePass> {
        let cache_config = self.config.event_cache.clone();
        let expire = self.expire_time(now);

        let changed = self.changed.len() as u32;
        self.traverse.tune(changed, &cache_config);
        let cleanup_allowed = changed <= cache_config.cleanup_allowed_change_events_count;

        self.delete_stale_rows();

        if self.traverse.cursor.is_empty() {
            self.traverse.cursor = self.index.numbers().into();
        }

        let records = cache_config.traverse_records as usize;
        let revising = self.traverse.next_revision_time == 0;
        let push_out = cache_config.push_out_prc_per_hour > 0.0 && has_neighbour;

        let (chunk, push_count) = if push_out {
            let chunk = self
                .traverse
                .cursor
                .iter()
                .take(records)
                .filter(|number| self.index.contains(**number))
                .count();
            let push_count = (self.index.len() as f64
                * cache_config.push_out_prc_per_hour
                * self.traverse.period as f64
                / (3600.0 * 100.0))
                .max(1.0);
            (chunk as f64, push_count)
        } else {
            (0.0, 0.0)
        };

        let mut pass = TraversePass::default();
        let mut obsolete = BTreeSet::new();
        let mut revise = Vec::new();
        let mut to_flush = BTreeSet::new();
        let mut rng = rand::thread_rng();

        for _ in 0..records {
            let Some(number) = self.traverse.cursor.pop_front() else {
                break;
            };
            let Some(event) = self.index.get(number) else {
                continue;
            };
            if event.flags.contains(EventFlags::PUSH_IN_PROGRESS) {
                continue;
            }

            if push_out && rng.r#gen::<f64>() * chunk < push_count {
                pass.push.push(number);
                continue;
            }

            if event.published_min < expire {
                if cleanup_allowed {
                    obsolete.insert(number);
                }
            } else if revising && !event.flags.contains(EventFlags::REVISED) {
                revise.push(number);
            }

            if event.flags.contains(EventFlags::DIRTY) {
                to_flush.insert(number);
            }
        }

        let touched: Vec<EventNumber> = obsolete.iter().copied().collect();
        self.load_core_words(&touched, now)?;

        pass.revise = self.revise_events(&revise, now, expire)?;

        pass.obsolete = obsolete.len();
        self.cleanup_obsolete(&obsolete, expire, true)?;

        to_flush.extend(obsolete);
        pass.flushed = self.flush(&to_flush)?;

        self.mark_push(&pass.push, now)?;

        if self.traverse.cursor.is_empty() {
            pass.next_delay = Duration::from_secs(cache_config.traverse_period_max);

            if revising {
                self.traverse.next_revision_time = if cache_config.revise_events_period == 0 {
                    0
                } else {
                    now + cache_config.revise_events_period
                };
            } else if now >= self.traverse.next_revision_time {
                self.traverse.next_revision_time = 0;
            }

            self.traverse.cursor = self.index.numbers().into();
        } else {
            pass.next_delay = Duration::from_secs(self.traverse.period);
        }

        Ok(pass)
    }

    /// One slice of the remake sweep. Runs only while the merge backlog is small and the
    /// main traversal sits at its minimal period, and stops at the first successful
    /// remake. Returns the delay before the next slice.
    pub fn remake_traverse(&mut self, now: u64) -> BankResult<Duration> {
        let remake = self.config.event_remake.clone();
        let cache_config = &self.config.event_cache;

        let quiet = self.changed.len() as u32 <= cache_config.cleanup_allowed_change_events_count
            && self.traverse.period <= cache_config.traverse_period_min;

        if !quiet {
            return Ok(Duration::from_secs(remake.traverse_period));
        }

        let recompose_since = now.saturating_sub(cache_config.recompose_timeout);
        let expire = self.expire_time(now);

        if self.remake_cursor.is_empty() {
            self.remake_cursor = self.index.numbers().into();
        }

        for _ in 0..remake.traverse_records {
            let Some(number) = self.remake_cursor.pop_front() else {
                break;
            };
            let Some(event) = self.index.get(number) else {
                continue;
            };

            let eligible = event.published_max > recompose_since
                && event.flags.contains(EventFlags::REVISED)
                && event.published_min > expire
                && !event.flags.contains(EventFlags::PUSH_IN_PROGRESS);

            if eligible && self.remake(number, remake.min_size_remake as usize, now)? {
                break;
            }
        }

        if self.remake_cursor.is_empty() {
            self.remake_cursor = self.index.numbers().into();
            Ok(Duration::from_secs(remake.traverse_pause))
        } else {
            Ok(Duration::from_secs(remake.traverse_period))
        }
    }

    // ============================================================
    // HANDOFF
    // ============================================================

    /// Moves the merge queue and the merge denials out of the shard.
    pub fn give(&mut self, snapshot: &mut ShardSnapshot) {
        snapshot.changed.extend(self.changed.drain());
        snapshot.blacklist.extend(self.blacklist.drain());
    }

    /// Moves the entries of the shard's languages from the snapshot into the shard.
    pub fn take(&mut self, snapshot: &mut ShardSnapshot) {
        let (mine, rest): (Vec<EventCardinality>, Vec<EventCardinality>) = snapshot
            .changed
            .drain(..)
            .partition(|c| self.langs.contains(&c.lang));
        snapshot.changed = rest;
        for cardinality in mine {
            self.changed.insert(cardinality);
        }

        let (mine, rest): (Vec<_>, Vec<_>) = snapshot
            .blacklist
            .drain(..)
            .partition(|(pair, _)| self.langs.contains(&pair.lang));
        snapshot.blacklist = rest;
        for (pair, denial) in mine {
            self.blacklist.insert(pair, denial);
        }
    }
}
