//! Event Arena
//!
//! Sole owner of a shard's events. Every other structure (id map, message ownership,
//! inverted word index, priority queue) refers to events through their `EventNumber`.

use crate::error::{BankError, BankResult};
use crate::event::event::Event;
use crate::event::types::{EventId, EventNumber, MessageId, WordId};

use std::collections::{BTreeSet, HashMap};

/// 0 and 1 are reserved sentinels.
const FIRST_EVENT_NUMBER: EventNumber = 2;

pub struct ClusterIndex {
    events: HashMap<EventNumber, Event>,
    id_to_number: HashMap<EventId, EventNumber>,
    /// Owner of every member message.
    message_events: HashMap<MessageId, EventNumber>,
    /// Inverted index over summary words.
    word_events: HashMap<WordId, BTreeSet<EventNumber>>,
    /// Released numbers below `next_number`, reused smallest first.
    free_numbers: BTreeSet<EventNumber>,
    next_number: EventNumber,
}

impl Default for ClusterIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterIndex {
    pub fn new() -> Self {
        Self {
            events: HashMap::new(),
            id_to_number: HashMap::new(),
            message_events: HashMap::new(),
            word_events: HashMap::new(),
            free_numbers: BTreeSet::new(),
            next_number: FIRST_EVENT_NUMBER,
        }
    }

    /// Smallest number not held by a live event.
    fn allocate_number(&mut self) -> EventNumber {
        if let Some(number) = self.free_numbers.pop_first() {
            return number;
        }
        let number = self.next_number;
        self.next_number += 1;
        number
    }

    fn release_number(&mut self, number: EventNumber) {
        if number + 1 == self.next_number {
            self.next_number = number;
            while let Some(last) = self.free_numbers.last().copied() {
                if last + 1 != self.next_number {
                    break;
                }
                self.free_numbers.remove(&last);
                self.next_number = last;
            }
        } else {
            self.free_numbers.insert(number);
        }
    }

    /// Registers an event: its id, the ownership of its members and its summary words.
    pub fn insert(&mut self, event: Event) -> BankResult<EventNumber> {
        if self.id_to_number.contains_key(&event.id) {
            return Err(BankError::invariant(format!("event {} registered twice", event.id)));
        }

        let number = self.allocate_number();
        self.id_to_number.insert(event.id, number);
        for mi in event.messages() {
            self.message_events.insert(mi.id, number);
        }
        self.events.insert(number, event);
        self.reference_words(number);

        Ok(number)
    }

    /// Unregisters an event. Member ownership is dropped only where it still points
    /// at this event.
    pub fn remove(&mut self, number: EventNumber) -> BankResult<Event> {
        self.unreference_words(number);

        let event = self
            .events
            .remove(&number)
            .ok_or_else(|| BankError::invariant(format!("unknown event number {}", number)))?;

        self.id_to_number.remove(&event.id);
        for mi in event.messages() {
            if self.message_events.get(&mi.id) == Some(&number) {
                self.message_events.remove(&mi.id);
            }
        }
        self.release_number(number);

        Ok(event)
    }

    pub fn get(&self, number: EventNumber) -> Option<&Event> {
        self.events.get(&number)
    }

    pub fn get_mut(&mut self, number: EventNumber) -> Option<&mut Event> {
        self.events.get_mut(&number)
    }

    pub fn event(&self, number: EventNumber) -> BankResult<&Event> {
        self.events
            .get(&number)
            .ok_or_else(|| BankError::invariant(format!("unknown event number {}", number)))
    }

    pub fn event_mut(&mut self, number: EventNumber) -> BankResult<&mut Event> {
        self.events
            .get_mut(&number)
            .ok_or_else(|| BankError::invariant(format!("unknown event number {}", number)))
    }

    pub fn contains(&self, number: EventNumber) -> bool {
        self.events.contains_key(&number)
    }

    pub fn number_of(&self, id: &EventId) -> Option<EventNumber> {
        self.id_to_number.get(id).copied()
    }

    pub fn owner_of(&self, message: MessageId) -> Option<EventNumber> {
        self.message_events.get(&message).copied()
    }

    /// Points the message at a new owner. Event membership is the caller's business.
    pub fn set_owner(&mut self, message: MessageId, number: EventNumber) {
        self.message_events.insert(message, number);
    }

    pub fn clear_owner(&mut self, message: MessageId) {
        self.message_events.remove(&message);
    }

    /// Adds the event's summary words to the inverted index.
    pub fn reference_words(&mut self, number: EventNumber) {
        if let Some(event) = self.events.get(&number) {
            for w in event.words.iter() {
                self.word_events.entry(w.word_id).or_default().insert(number);
            }
        }
    }

    /// Removes the event's summary words from the inverted index. Must run before the
    /// summary is re-derived, paired with `reference_words` afterwards.
    pub fn unreference_words(&mut self, number: EventNumber) {
        if let Some(event) = self.events.get(&number) {
            for w in event.words.iter() {
                if let Some(set) = self.word_events.get_mut(&w.word_id) {
                    set.remove(&number);
                    if set.is_empty() {
                        self.word_events.remove(&w.word_id);
                    }
                }
            }
        }
    }

    /// Events whose summary contains the word.
    pub fn word_events(&self, word_id: WordId) -> Option<&BTreeSet<EventNumber>> {
        self.word_events.get(&word_id)
    }

    /// Live event numbers in ascending order.
    pub fn numbers(&self) -> Vec<EventNumber> {
        let mut numbers: Vec<EventNumber> = self.events.keys().copied().collect();
        numbers.sort_unstable();
        numbers
    }

    pub fn events(&self) -> impl Iterator<Item = (&EventNumber, &Event)> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn message_count(&self) -> usize {
        self.message_events.len()
    }

    pub fn word_count(&self) -> usize {
        self.word_events.len()
    }
}
