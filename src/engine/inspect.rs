//! What-if introspection for debugging and UI display: hypothetical merges, splits
//! and separations computed on copies, never applied.

use super::state::ShardState;
use super::types::*;
use crate::error::BankResult;
use crate::event::event::Event;
use crate::event::types::*;
use crate::index::blacklist::HashPair;

impl ShardState {
    /// Current owner of each message, in request order.
    pub fn owning_events(&self, ids: &[MessageId]) -> BankResult<Vec<MessageEvent>> {
        let mut events = Vec::with_capacity(ids.len());

        for id in ids {
            let owner = match self.index.owner_of(*id) {
                Some(number) => {
                    let event = self.index.event(number)?;
                    MessageEvent {
                        id: *id,
                        event_id: Some(event.id),
                        event_capacity: event.size() as u32,
                    }
                }
                None => MessageEvent::unowned(*id),
            };
            events.push(owner);
        }

        Ok(events)
    }

    /// Snapshots of the queried events with the requested hypotheticals. Unknown ids
    /// are left out.
    pub fn get_events(&mut self, queries: &[EventQuery], now: u64) -> BankResult<Vec<EventRelation>> {
        let mut relations = Vec::with_capacity(queries.len());

        for query in queries {
            let Some(number) = self.index.number_of(&query.id) else {
                continue;
            };

            self.load_core_words(&[number], now)?;

            let event = self.index.event(number)?.clone();

            let relation = match query.relation {
                Some(related) => self.relation(&event, related, now)?,
                None => None,
            };

            let split = query.split.map(|at| self.split_parts(&event, at));

            let separate = match &query.separate {
                Some(request) => Some(self.separate_parts(&event, request, query.relation, now)?),
                None => None,
            };

            relations.push(EventRelation {
                event: EventSnapshot::from(&event),
                changed: self.changed.contains(&event.id),
                relation,
                split,
                separate,
            });
        }

        Ok(relations)
    }

    /// How `event` relates to the event `related`, including the event a merge of the
    /// two would produce.
    fn relation(&mut self, event: &Event, related: EventId, now: u64) -> BankResult<Option<RelationInfo>> {
        let Some(number) = self.index.number_of(&related) else {
            return Ok(None);
        };

        self.load_core_words(&[number], now)?;

        let other = self.index.event(number)?;
        let blacklist_timeout = self
            .blacklist
            .get(&HashPair::new(event.hash(), other.hash(), event.lang))
            .map(|denial| denial.timeout);

        let mut messages = event.messages().to_vec();
        messages.extend_from_slice(other.messages());
        let merged = self.build_event(EventId::default(), event.lang, messages);

        Ok(Some(RelationInfo {
            event: EventSnapshot::from(other),
            overlap: event.words_overlap(other),
            merge_level: self
                .model
                .pair_merge_level(event, other, event.strain().max(other.strain())),
            blacklist_timeout,
            merge_result: EventSnapshot::from(&merged),
        }))
    }

    /// Cuts the event, sorted newest first, right before member `at`.
    fn split_parts(&self, event: &Event, at: MessageId) -> EventParts {
        let mut sorted: Vec<MessageInfo> = event
            .messages()
            .iter()
            .filter(|mi| mi.published != 0 && self.cache.contains(&mi.id))
            .copied()
            .collect();
        sorted.sort_by(|a, b| b.published.cmp(&a.published));

        let mut parts = EventParts::default();

        if let Some(i) = sorted.iter().position(|mi| mi.id == at) {
            let part2 = sorted.split_off(i);
            parts.part1 = Some(EventSnapshot::from(&self.build_event(
                EventId::default(),
                event.lang,
                sorted,
            )));
            parts.part2 = Some(EventSnapshot::from(&self.build_event(
                EventId::default(),
                event.lang,
                part2,
            )));
        }

        parts
    }

    /// Partitions the event by presence of a word, optionally relating both parts to
    /// another event.
    fn separate_parts(
        &mut self,
        event: &Event,
        request: &SeparateRequest,
        related: Option<EventId>,
        now: u64,
    ) -> BankResult<EventParts> {
        let (msgs1, msgs2): (Vec<MessageInfo>, Vec<MessageInfo>) = event
            .messages()
            .iter()
            .filter(|mi| self.cache.contains(&mi.id))
            .partition(|mi| match self.cache.get(&mi.id) {
                Some(words) if request.narrow => words.first() == Some(&request.word_id),
                Some(words) => words.contains(&request.word_id),
                None => false,
            });

        let mut parts = EventParts::default();

        if !msgs1.is_empty() {
            let part = self.build_event(EventId::default(), event.lang, msgs1);
            if let Some(related) = related {
                parts.merge1 = self.relation(&part, related, now)?;
            }
            parts.part1 = Some(EventSnapshot::from(&part));
        }

        if !msgs2.is_empty() {
            let part = self.build_event(EventId::default(), event.lang, msgs2);
            if let Some(related) = related {
                parts.merge2 = self.relation(&part, related, now)?;
            }
            parts.part2 = Some(EventSnapshot::from(&part));
        }

        Ok(parts)
    }
}
