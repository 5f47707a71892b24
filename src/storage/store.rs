use crate::error::BankResult;
use crate::event::types::{EventId, Lang, MessageId};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Persisted event row: id, language and versioned blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventRecord {
    pub id: EventId,
    pub lang: Lang,
    pub blob: Vec<u8>,
}

/// Persisted message row holding the message's ranked core words.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub lang: Lang,
    pub blob: Vec<u8>,
}

/// Durable key-blob storage of events and their member messages.
///
/// Calls are synchronous and may block the calling task. Implementations must be safe
/// for concurrent use by several engines.
pub trait EventStore: Send + Sync {
    /// Insert-or-update by id.
    fn upsert_events(&self, records: Vec<EventRecord>) -> BankResult<()>;

    fn delete_events(&self, ids: &[EventId]) -> BankResult<()>;

    /// Up to `limit` events of `langs` with id greater than `after`, ordered by id.
    fn load_events(
        &self,
        langs: &BTreeSet<Lang>,
        after: Option<EventId>,
        limit: usize,
    ) -> BankResult<Vec<EventRecord>>;

    /// Insert-or-update by id.
    fn upsert_messages(&self, records: Vec<MessageRecord>) -> BankResult<()>;

    fn delete_messages(&self, ids: &[MessageId]) -> BankResult<()>;

    /// Up to `limit` messages of `langs` with id greater than `after`, ordered by id.
    fn load_messages(
        &self,
        langs: &BTreeSet<Lang>,
        after: Option<MessageId>,
        limit: usize,
    ) -> BankResult<Vec<MessageRecord>>;

    /// Rows of the given messages; missing ids are skipped.
    fn get_messages(&self, ids: &[MessageId]) -> BankResult<Vec<MessageRecord>>;

    /// Number of stored events per language.
    fn event_counts(&self) -> BankResult<Vec<(Lang, u64)>>;
}
