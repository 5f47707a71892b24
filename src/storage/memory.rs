use super::store::*;
use crate::error::{BankError, BankResult};
use crate::event::types::{EventId, Lang, MessageId};

use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// `EventStore` kept in concurrent in-process maps.
///
/// Rows live as long as the process. `set_available(false)` makes every call fail with
/// a persistence error, which is how store outages are exercised.
pub struct MemoryStore {
    events: DashMap<EventId, EventRecord>,
    messages: DashMap<MessageId, MessageRecord>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: DashMap::new(),
            messages: DashMap::new(),
            available: AtomicBool::new(true),
        })
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn get_event(&self, id: &EventId) -> Option<EventRecord> {
        self.events.get(id).map(|r| r.value().clone())
    }

    fn check(&self) -> BankResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BankError::store("memory store unavailable"))
        }
    }
}

impl EventStore for MemoryStore {
    fn upsert_events(&self, records: Vec<EventRecord>) -> BankResult<()> {
        self.check()?;
        for record in records {
            self.events.insert(record.id, record);
        }
        Ok(())
    }

    fn delete_events(&self, ids: &[EventId]) -> BankResult<()> {
        self.check()?;
        for id in ids {
            self.events.remove(id);
        }
        Ok(())
    }

    fn load_events(
        &self,
        langs: &BTreeSet<Lang>,
        after: Option<EventId>,
        limit: usize,
    ) -> BankResult<Vec<EventRecord>> {
        self.check()?;
        let mut records: Vec<EventRecord> = self
            .events
            .iter()
            .filter(|r| langs.contains(&r.lang) && after.is_none_or(|a| r.id > a))
            .map(|r| r.value().clone())
            .collect();

        records.sort_by_key(|r| r.id);
        records.truncate(limit);
        Ok(records)
    }

    fn upsert_messages(&self, records: Vec<MessageRecord>) -> BankResult<()> {
        self.check()?;
        for record in records {
            self.messages.insert(record.id, record);
        }
        Ok(())
    }

    fn delete_messages(&self, ids: &[MessageId]) -> BankResult<()> {
        self.check()?;
        for id in ids {
            self.messages.remove(id);
        }
        Ok(())
    }

    fn load_messages(
        &self,
        langs: &BTreeSet<Lang>,
        after: Option<MessageId>,
        limit: usize,
    ) -> BankResult<Vec<MessageRecord>> {
        self.check()?;
        let mut records: Vec<MessageRecord> = self
            .messages
            .iter()
            .filter(|r| langs.contains(&r.lang) && after.is_none_or(|a| r.id > a))
            .map(|r| r.value().clone())
            .collect();

        records.sort_by_key(|r| r.id);
        records.truncate(limit);
        Ok(records)
    }

    fn get_messages(&self, ids: &[MessageId]) -> BankResult<Vec<MessageRecord>> {
        self.check()?;
        Ok(ids
            .iter()
            .filter_map(|id| self.messages.get(id).map(|r| r.value().clone()))
            .collect())
    }

    fn event_counts(&self) -> BankResult<Vec<(Lang, u64)>> {
        self.check()?;
        let mut counts: HashMap<Lang, u64> = HashMap::new();
        for record in self.events.iter() {
            *counts.entry(record.lang).or_default() += 1;
        }

        let mut counts: Vec<(Lang, u64)> = counts.into_iter().collect();
        counts.sort();
        Ok(counts)
    }
}
