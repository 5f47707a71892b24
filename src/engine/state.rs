//! Shard State
//!
//! Everything one engine mutates under its lock: the cluster index, the merge queue,
//! merge denials, the core-word cache and the engine's own bookkeeping (dissenter
//! total, pending ownership notifications, traversal cursors, load progress).

use super::types::ShardStatus;
use crate::config::{BankConfig, CacheConfig, PeriodMaximization};
use crate::error::BankResult;
use crate::event::model::MergeModel;
use crate::event::types::*;
use crate::index::arena::ClusterIndex;
use crate::index::blacklist::MergeBlacklist;
use crate::index::cache::CoreWordCache;
use crate::index::changed::{ChangedEvents, EventCardinality};
use crate::storage::store::EventStore;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of recent changed-queue sizes the traversal period is tuned on.
const CHANGED_HISTORY_LEN: usize = 20;

/// Phase of the initial load: events first, then a sweep for orphaned messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Events,
    OrphanMessages,
    Done,
}

/// Resumable position of the chunked load.
#[derive(Debug, Clone)]
pub struct LoadCursor {
    pub stage: LoadStage,
    /// Last event id read; the next chunk starts after it.
    pub last_event: Option<EventId>,
    pub last_message: Option<MessageId>,
}

impl Default for LoadCursor {
    fn default() -> Self {
        Self {
            stage: LoadStage::Events,
            last_event: None,
            last_message: None,
        }
    }
}

/// Self-tuning state of the maintenance traversal.
#[derive(Debug)]
pub struct TraverseState {
    /// Seconds between traversal passes.
    pub period: u64,
    /// Events still to visit in the current sweep.
    pub cursor: VecDeque<EventNumber>,
    /// 0 while the current sweep revises dissenters.
    pub next_revision_time: u64,
    history: VecDeque<u32>,
    history_sum: u64,
}

impl TraverseState {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            period: config.traverse_period_min,
            cursor: VecDeque::new(),
            next_revision_time: 0,
            history: std::iter::repeat_n(0, CHANGED_HISTORY_LEN).collect(),
            history_sum: 0,
        }
    }

    /// Records the current changed-queue size and adapts the period: it grows per
    /// policy while the backlog trend worsens and shrinks back to the minimum otherwise.
    pub fn tune(&mut self, changed: u32, config: &CacheConfig) {
        let len = self.history.len() as f64;
        let avg_old = self.history_sum as f64 / len;

        if let Some(oldest) = self.history.pop_back() {
            self.history_sum -= oldest as u64;
        }
        self.history.push_front(changed);
        self.history_sum += changed as u64;

        let avg_new = self.history_sum as f64 / len;
        let filled = self.history.iter().all(|c| *c != 0);

        if avg_new > avg_old && avg_old != 0.0 && filled {
            let max = config.traverse_period_max;
            self.period = match config.traverse_period_maximization {
                PeriodMaximization::Inc => (self.period + 1).min(max),
                PeriodMaximization::Dbl => (self.period * 2).clamp(1, max),
                PeriodMaximization::Max => max,
            };
        } else if self.period > config.traverse_period_min {
            if changed != 0 {
                self.period -= 1;
            } else {
                self.period = config.traverse_period_min;
            }
        }
    }
}

/// One clustering engine's mutable state. The manager keeps it behind a single
/// `RwLock`; nothing in here locks on its own.
pub struct ShardState {
    pub(crate) config: Arc<BankConfig>,
    pub(crate) model: MergeModel,
    pub(crate) store: Arc<dyn EventStore>,
    /// Languages this shard clusters; digests of other languages stay unowned.
    pub(crate) langs: BTreeSet<Lang>,
    pub(crate) index: ClusterIndex,
    /// Events waiting for a merge attempt.
    pub(crate) changed: ChangedEvents,
    pub(crate) blacklist: MergeBlacklist,
    /// Core words of members, filled lazily from the store.
    pub(crate) cache: CoreWordCache,
    /// Sum of every event's dissenters.
    pub(crate) dissenters: u64,
    /// Latest owner per message, not yet posted to the message bank.
    pub(crate) pending_updates: HashMap<MessageId, MessageEvent>,
    /// Earliest time the next batch of ownership updates may go out.
    pub(crate) next_update: Option<Instant>,
    pub(crate) traverse: TraverseState,
    pub(crate) remake_cursor: VecDeque<EventNumber>,
    pub(crate) load: LoadCursor,
    /// Re-derive summaries and dissenters of every loaded event.
    pub(crate) full_rebuild: bool,
    /// Rows of pushed-out events still waiting to be deleted from the store.
    pub(crate) stale_rows: StaleRows,
}

/// Store rows left behind by events that migrated to another bank.
#[derive(Debug, Default)]
pub struct StaleRows {
    pub events: Vec<EventId>,
    pub messages: Vec<MessageId>,
}

impl StaleRows {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.messages.is_empty()
    }
}

impl ShardState {
    pub fn new(langs: BTreeSet<Lang>, config: Arc<BankConfig>, store: Arc<dyn EventStore>) -> Self {
        Self {
            model: MergeModel::new(&config.event),
            traverse: TraverseState::new(&config.event_cache),
            config,
            store,
            langs,
            index: ClusterIndex::new(),
            changed: ChangedEvents::new(),
            blacklist: MergeBlacklist::new(),
            cache: CoreWordCache::new(),
            dissenters: 0,
            pending_updates: HashMap::new(),
            next_update: None,
            remake_cursor: VecDeque::new(),
            load: LoadCursor::default(),
            full_rebuild: false,
            stale_rows: StaleRows::default(),
        }
    }

    /// Members published at or before this time are obsolete.
    pub fn expire_time(&self, now: u64) -> u64 {
        now.saturating_sub(self.config.message_expiration_time)
    }

    /// Refreshes the event's can-merge flag and queues it for a merge attempt when
    /// eligible.
    pub(crate) fn queue_if_mergeable(&mut self, number: EventNumber) -> BankResult<bool> {
        let event = self.index.event_mut(number)?;
        let can_merge = self.model.set_merge(event);
        if can_merge {
            self.changed.insert(EventCardinality::of(event));
        }
        Ok(can_merge)
    }

    /// Records the current owner of every member of the event.
    pub(crate) fn note_members(&mut self, number: EventNumber) -> BankResult<()> {
        let event = self.index.event(number)?;
        let capacity = event.size() as u32;
        for mi in event.messages() {
            self.pending_updates.insert(
                mi.id,
                MessageEvent {
                    id: mi.id,
                    event_id: Some(event.id),
                    event_capacity: capacity,
                },
            );
        }
        Ok(())
    }

    /// Records a single ownership change; a later one for the same message wins.
    pub(crate) fn note_update(&mut self, update: MessageEvent) {
        self.pending_updates.insert(update.id, update);
    }

    /// Hands out the pending ownership notifications once enough have accumulated (or
    /// the merge queue is drained) and the minimal posting period has elapsed.
    pub fn take_updates(&mut self, force: bool) -> Vec<MessageEvent> {
        if self.pending_updates.is_empty() {
            return Vec::new();
        }

        let now = Instant::now();
        if !force {
            if self.next_update.is_some_and(|next| now < next) {
                return Vec::new();
            }
            let chunk = self.config.message_update_chunk_size as usize;
            if !self.changed.is_empty() && self.pending_updates.len() < chunk {
                return Vec::new();
            }
        }

        self.next_update =
            Some(now + Duration::from_millis(self.config.message_update_chunk_min_period));

        let mut updates: Vec<MessageEvent> =
            self.pending_updates.drain().map(|(_, update)| update).collect();
        updates.sort_by_key(|u| u.id);
        updates
    }

    pub fn status(&self, loaded: bool, queued_tasks: usize) -> ShardStatus {
        ShardStatus {
            langs: self.langs.iter().copied().collect(),
            loaded,
            events: self.index.len(),
            messages: self.index.message_count(),
            changed_events: self.changed.len(),
            dissenters: self.dissenters,
            blacklist: self.blacklist.len(),
            cached_messages: self.cache.len(),
            queued_tasks,
            traverse_period: self.traverse.period,
        }
    }
}
