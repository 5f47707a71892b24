//! Event migration to neighbour banks.
//!
//! Selected events are flagged push-in-progress (which also takes them out of merging)
//! under the lock, shipped without it, and then either dropped for good or restored,
//! depending on the neighbour's answer.

use super::state::ShardState;
use super::types::{EventPushInfo, PushPack, Side};
use crate::error::BankResult;
use crate::event::types::*;

use rand::Rng;
use std::collections::HashMap;

impl ShardState {
    /// Flags the events as migrating and makes sure their members' core words are at
    /// hand for the digests.
    pub(crate) fn mark_push(&mut self, numbers: &[EventNumber], now: u64) -> BankResult<()> {
        if numbers.is_empty() {
            return Ok(());
        }

        self.load_core_words(numbers, now)?;

        for number in numbers {
            let event = self.index.event_mut(*number)?;
            event.flags.insert(EventFlags::PUSH_IN_PROGRESS);
            event.flags.remove(EventFlags::CAN_MERGE);
        }

        Ok(())
    }

    /// Packs migrating events per direction. An event without a spin gets a fresh one
    /// of `bank_count` hops in a random direction; every push consumes one hop.
    pub fn push_packs(&self, numbers: &[EventNumber], bank_count: usize) -> BankResult<HashMap<Side, PushPack>> {
        let mut packs: HashMap<Side, PushPack> = HashMap::new();
        let mut rng = rand::thread_rng();
        let hops = bank_count.max(1) as i32;

        for number in numbers {
            let event = self.index.event(*number)?;

            let spin = match event.spin {
                0 if rng.r#gen::<bool>() => hops,
                0 => -hops,
                spin => spin,
            };

            let (side, next_spin) = if spin < 0 {
                (Side::Left, spin + 1)
            } else {
                (Side::Right, spin - 1)
            };

            let pack = packs.entry(side).or_default();

            pack.events.push(EventPushInfo {
                id: event.id,
                spin: next_spin,
                flags: event.persistent_flags().0,
                dissenters: event.dissenters(),
            });

            for mi in event.messages().iter().filter(|mi| mi.published != 0) {
                if let Some(words) = self.cache.get(&mi.id) {
                    pack.digests.push(MessageDigest {
                        id: mi.id,
                        published: mi.published,
                        lang: event.lang,
                        core_words: words.to_vec(),
                        event_id: Some(event.id),
                    });
                }
            }
        }

        Ok(packs)
    }

    /// Finalizes a push. Delivered events leave the index at once; their stored rows
    /// are deleted afterwards, and rows the store refuses are retried on the next
    /// traversal. Undelivered events return to normal merging.
    pub fn complete_push(&mut self, ids: &[EventId], delivered: bool) -> BankResult<usize> {
        let mut completed = 0;
        let mut stale_events = Vec::new();
        let mut stale_messages = Vec::new();

        for id in ids {
            let Some(number) = self.index.number_of(id) else {
                continue;
            };

            if !delivered {
                let event = self.index.event_mut(number)?;
                event.flags.remove(EventFlags::PUSH_IN_PROGRESS);
                self.queue_if_mergeable(number)?;
                continue;
            }

            let removed = self.index.remove(number)?;
            self.dissenters = self.dissenters.saturating_sub(removed.dissenters() as u64);
            self.changed.remove(id);

            for mi in removed.messages() {
                self.cache.remove(&mi.id);
                stale_messages.push(mi.id);
            }
            if !removed.flags.contains(EventFlags::MEM_ONLY) {
                stale_events.push(*id);
            }
            completed += 1;
        }

        self.stale_rows.events.extend(stale_events);
        self.stale_rows.messages.extend(stale_messages);
        self.delete_stale_rows();

        Ok(completed)
    }

    /// Deletes the rows of events that left this bank. On a store failure the rows
    /// stay queued and the next call tries again.
    pub(crate) fn delete_stale_rows(&mut self) {
        if self.stale_rows.is_empty() {
            return;
        }

        if !self.stale_rows.events.is_empty() {
            match self.store.delete_events(&self.stale_rows.events) {
                Ok(()) => self.stale_rows.events.clear(),
                Err(e) => tracing::warn!(
                    "Deferring deletion of {} pushed events: {}",
                    self.stale_rows.events.len(),
                    e
                ),
            }
        }

        if !self.stale_rows.messages.is_empty() {
            match self.store.delete_messages(&self.stale_rows.messages) {
                Ok(()) => self.stale_rows.messages.clear(),
                Err(e) => tracing::warn!(
                    "Deferring deletion of {} pushed messages: {}",
                    self.stale_rows.messages.len(),
                    e
                ),
            }
        }
    }
}
