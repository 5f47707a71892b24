//! Versioned blob codec for persisted rows.
//!
//! Every blob starts with a one-byte format version followed by the bincode body.

use super::store::{EventRecord, MessageRecord};
use crate::error::{BankError, BankResult};
use crate::event::event::Event;
use crate::event::types::{EventFlags, EventWordWeight, Lang, MessageId, MessageInfo, WordId};

use serde::{Deserialize, Serialize};

const EVENT_BLOB_VERSION: u8 = 1;
const MESSAGE_BLOB_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct StoredEvent {
    flags: u8,
    spin: i32,
    dissenters: u32,
    words: Vec<EventWordWeight>,
    messages: Vec<MessageInfo>,
}

fn versioned<T: Serialize>(version: u8, body: &T) -> BankResult<Vec<u8>> {
    let mut blob = vec![version];
    blob.extend(bincode::serialize(body)?);
    Ok(blob)
}

fn corrupt(id: impl ToString, reason: impl Into<String>) -> BankError {
    BankError::Corrupt {
        id: id.to_string(),
        reason: reason.into(),
    }
}

pub fn encode_event(event: &Event) -> BankResult<EventRecord> {
    let stored = StoredEvent {
        flags: event.persistent_flags().0,
        spin: event.spin,
        dissenters: event.dissenters(),
        words: event.words.clone(),
        messages: event.messages().to_vec(),
    };

    Ok(EventRecord {
        id: event.id,
        lang: event.lang,
        blob: versioned(EVENT_BLOB_VERSION, &stored)?,
    })
}

/// Rebuilds an event from its row. Any decoding problem is reported as `Corrupt`.
pub fn decode_event(record: &EventRecord) -> BankResult<Event> {
    let (version, body) = record
        .blob
        .split_first()
        .ok_or_else(|| corrupt(record.id, "empty blob"))?;

    if *version != EVENT_BLOB_VERSION {
        return Err(corrupt(record.id, format!("unsupported version {}", version)));
    }

    let stored: StoredEvent =
        bincode::deserialize(body).map_err(|e| corrupt(record.id, e.to_string()))?;

    if stored.messages.is_empty() {
        return Err(corrupt(record.id, "event without members"));
    }

    let mut event = Event::new(record.id, record.lang);
    event.flags = EventFlags(stored.flags).persistent();
    event.spin = stored.spin;
    event.set_messages(stored.messages);
    event.set_ranked_words(stored.words);
    event.set_dissenters(stored.dissenters.min(event.size() as u32));

    Ok(event)
}

pub fn encode_message(id: MessageId, lang: Lang, words: &[WordId]) -> BankResult<MessageRecord> {
    Ok(MessageRecord {
        id,
        lang,
        blob: versioned(MESSAGE_BLOB_VERSION, &words.to_vec())?,
    })
}

pub fn decode_message(record: &MessageRecord) -> BankResult<Vec<WordId>> {
    let (version, body) = record
        .blob
        .split_first()
        .ok_or_else(|| corrupt(record.id, "empty blob"))?;

    if *version != MESSAGE_BLOB_VERSION {
        return Err(corrupt(record.id, format!("unsupported version {}", version)));
    }

    bincode::deserialize(body).map_err(|e| corrupt(record.id, e.to_string()))
}
