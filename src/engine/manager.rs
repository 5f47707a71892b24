//! Event Manager
//!
//! One clustering engine: a `ShardState` behind a reader/writer lock, driven by its
//! own task queue and worker. RPC entry points take the lock directly; maintenance
//! runs as queued tasks that reschedule themselves.

use super::peers::{BankPeers, MessageEventSink};
use super::state::ShardState;
use super::types::*;
use crate::config::BankConfig;
use crate::error::{BankError, BankResult};
use crate::event::types::*;
use crate::executor::executor::TaskExecutor;
use crate::executor::queue::TaskQueue;
use crate::executor::types::ShardTask;
use crate::storage::store::EventStore;

use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Runs one shard: a single worker drains the task queue while RPCs share the state
/// lock with it.
pub struct EventManager {
    name: String,
    config: Arc<BankConfig>,
    state: RwLock<ShardState>,
    queue: Arc<TaskQueue>,
    peers: Arc<dyn BankPeers>,
    sink: Arc<dyn MessageEventSink>,
    loaded: AtomicBool,
    /// Set by `stop`; RPCs are refused from then on.
    unloaded: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventManager {
    pub fn new(
        langs: BTreeSet<Lang>,
        config: Arc<BankConfig>,
        store: Arc<dyn EventStore>,
        peers: Arc<dyn BankPeers>,
        sink: Arc<dyn MessageEventSink>,
    ) -> Arc<Self> {
        let name = format!(
            "events[{}]",
            langs.iter().map(|l| l.0.to_string()).collect::<Vec<_>>().join(",")
        );

        Arc::new(Self {
            name,
            state: RwLock::new(ShardState::new(langs, config.clone(), store)),
            config,
            queue: TaskQueue::new(),
            peers,
            sink,
            loaded: AtomicBool::new(false),
            unloaded: AtomicBool::new(false),
            worker: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    fn worker(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawns the worker and queues loading (or, for an engine that is already loaded,
    /// the recurring maintenance tasks).
    pub fn start(self: &Arc<Self>) {
        let manager = self.clone();
        let executor = TaskExecutor::new(self.name.clone(), self.queue.clone(), move |task| {
            let manager = manager.clone();
            async move { manager.run_task(task).await }
        });

        *self.worker() = Some(executor.start());

        if self.is_loaded() {
            self.schedule_maintenance();
        } else {
            self.queue.deliver_now(ShardTask::LoadEvents);
        }
    }

    /// Stops the worker, then persists every dirty event and posts the remaining
    /// ownership updates. Returns the number of flushed events.
    pub async fn stop(&self) -> BankResult<usize> {
        self.unloaded.store(true, Ordering::SeqCst);
        self.queue.stop();

        let handle = self.worker().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!("{}: worker ended abnormally: {}", self.name, e);
        }

        let (flushed, updates) = {
            let mut state = self.state.write().await;
            state.delete_stale_rows();
            (state.flush_dirty()?, state.take_updates(true))
        };
        self.post_updates(updates).await;

        tracing::info!("{} stopped, {} dirty events flushed", self.name, flushed);
        Ok(flushed)
    }

    fn schedule_maintenance(&self) {
        let cache = &self.config.event_cache;
        self.queue.deliver_now(ShardTask::MergeEvents);
        self.queue
            .deliver_at(ShardTask::TraverseEvents, Duration::from_secs(cache.traverse_period_min));

        let remake = &self.config.event_remake;
        if remake.traverse_records > 0 {
            self.queue
                .deliver_at(ShardTask::RemakeTraverse, Duration::from_secs(remake.traverse_pause));
        }
    }

    /// Broken invariants are errors, everything else (store, transport) a warning.
    fn log_failure(&self, task: &str, error: &BankError) {
        match error {
            BankError::Invariant(_) => tracing::error!("{}: {} aborted: {}", self.name, task, error),
            _ => tracing::warn!("{}: {} failed: {}", self.name, task, error),
        }
    }

    // ============================================================
    // TASKS
    // ============================================================

    pub async fn run_task(&self, task: ShardTask) -> Result<()> {
        match task {
            ShardTask::LoadEvents => self.load_events().await,
            ShardTask::MergeEvents => self.merge_events().await,
            ShardTask::TraverseEvents => self.traverse_events().await,
            ShardTask::RemakeTraverse => self.remake_traverse().await,
            ShardTask::DeleteMessages(ids) => self.delete_messages_task(ids).await,
        }
    }

    async fn load_events(&self) -> Result<()> {
        let result = self.state.write().await.load_chunk(now_secs());

        match result {
            Ok(false) => self.queue.deliver_now(ShardTask::LoadEvents),
            Ok(true) => {
                self.loaded.store(true, Ordering::SeqCst);
                let status = self.status().await;
                tracing::info!(
                    "{} loaded: {} events, {} messages, {} dissenters",
                    self.name,
                    status.events,
                    status.messages,
                    status.dissenters
                );
                self.schedule_maintenance();
            }
            Err(e) => {
                self.log_failure("load", &e);
                self.queue.deliver_at(
                    ShardTask::LoadEvents,
                    Duration::from_secs(self.config.event_cache.event_load_retry_delay),
                );
            }
        }

        Ok(())
    }

    async fn merge_events(&self) -> Result<()> {
        let cache = &self.config.event_cache;

        let (result, updates) = {
            let mut state = self.state.write().await;
            let result = state.merge_step(now_secs());
            (result, state.take_updates(false))
        };
        self.post_updates(updates).await;

        let delay = match result {
            Ok(outcome) if outcome.idle => Duration::from_millis(cache.merge_check_period),
            Ok(_) => Duration::ZERO,
            Err(e) => {
                self.log_failure("merge", &e);
                Duration::from_secs(cache.event_load_retry_delay)
                    .max(Duration::from_millis(cache.merge_check_period))
            }
        };

        self.queue.deliver_at(ShardTask::MergeEvents, delay);
        Ok(())
    }

    async fn traverse_events(&self) -> Result<()> {
        let delay = match self.traverse_pass().await {
            Ok(delay) => delay,
            Err(e) => {
                self.log_failure("traverse", &e);
                Duration::from_secs(self.config.event_cache.traverse_period_max)
            }
        };

        self.queue.deliver_at(ShardTask::TraverseEvents, delay);
        Ok(())
    }

    async fn traverse_pass(&self) -> BankResult<Duration> {
        let now = now_secs();

        let (pass, packs) = {
            let mut state = self.state.write().await;
            let pass = state.traverse(now, self.peers.has_neighbour())?;
            let packs = state.push_packs(&pass.push, self.peers.bank_count())?;
            (pass, packs)
        };

        tracing::debug!(
            "{}: traverse revised {}, recomposed {}, remade {}, detached {}, obsolete {}, flushed {}, pushing {}",
            self.name,
            pass.revise.revised,
            pass.revise.recomposed,
            pass.revise.remade,
            pass.revise.detached,
            pass.obsolete,
            pass.flushed,
            pass.push.len()
        );

        for (side, pack) in packs {
            let ids: Vec<EventId> = pack.events.iter().map(|info| info.id).collect();

            let delivered = match self.peers.push_events(side, pack).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        "{}: push of {} events to the {:?} neighbour failed: {}",
                        self.name,
                        ids.len(),
                        side,
                        e
                    );
                    false
                }
            };

            match self.state.write().await.complete_push(&ids, delivered) {
                Ok(completed) if delivered => {
                    tracing::debug!("{}: {} events pushed {:?}", self.name, completed, side);
                }
                Ok(_) => {}
                Err(e) => self.log_failure("push completion", &e),
            }
        }

        let updates = self.state.write().await.take_updates(false);
        self.post_updates(updates).await;

        Ok(pass.next_delay)
    }

    async fn remake_traverse(&self) -> Result<()> {
        let (result, updates) = {
            let mut state = self.state.write().await;
            let result = state.remake_traverse(now_secs());
            (result, state.take_updates(false))
        };
        self.post_updates(updates).await;

        let delay = match result {
            Ok(delay) => delay,
            Err(e) => {
                self.log_failure("remake", &e);
                Duration::from_secs(self.config.event_remake.traverse_pause)
            }
        };

        self.queue.deliver_at(ShardTask::RemakeTraverse, delay);
        Ok(())
    }

    async fn delete_messages_task(&self, ids: Vec<MessageId>) -> Result<()> {
        let detached = self.state.write().await.delete_messages(&ids)?;
        tracing::debug!("{}: {} of {} messages detached", self.name, detached, ids.len());
        Ok(())
    }

    /// Sends ownership updates to the sink in chunks. They are advisory, so a failed
    /// chunk drops the rest.
    async fn post_updates(&self, updates: Vec<MessageEvent>) {
        if updates.is_empty() {
            return;
        }

        let chunk = (self.config.message_update_chunk_size as usize).max(1);
        for batch in updates.chunks(chunk) {
            if let Err(e) = self.sink.post_message_events(batch.to_vec()).await {
                tracing::warn!(
                    "{}: dropping {} ownership updates: {}",
                    self.name,
                    updates.len(),
                    e
                );
                return;
            }
        }
    }

    // ============================================================
    // RPC ENTRY POINTS
    // ============================================================

    fn ensure_loaded(&self) -> BankResult<()> {
        if self.unloaded.load(Ordering::SeqCst) {
            return Err(BankError::not_ready(format!("{} is unloaded", self.name)));
        }
        if !self.is_loaded() {
            return Err(BankError::not_ready(format!("{} is loading", self.name)));
        }
        Ok(())
    }

    /// Inserts digests and returns their owners, aligned with the input.
    pub async fn post_digests(&self, digests: &[MessageDigest]) -> BankResult<Vec<MessageEvent>> {
        self.ensure_loaded()?;
        self.state.write().await.insert(digests, now_secs(), true)
    }

    /// Owners of the given messages plus the number of messages this engine holds.
    pub async fn get_owning_events(&self, ids: &[MessageId]) -> BankResult<(Vec<MessageEvent>, u64)> {
        self.ensure_loaded()?;
        let state = self.state.read().await;
        let events = state.owning_events(ids)?;
        Ok((events, state.index.message_count() as u64))
    }

    pub async fn get_events(&self, queries: &[EventQuery]) -> BankResult<Vec<EventRelation>> {
        self.ensure_loaded()?;
        self.state.write().await.get_events(queries, now_secs())
    }

    /// Queues the detachment of the messages from their events.
    pub fn delete_messages(&self, ids: Vec<MessageId>) -> BankResult<()> {
        self.ensure_loaded()?;
        if !ids.is_empty() {
            self.queue.deliver_now(ShardTask::DeleteMessages(ids));
        }
        Ok(())
    }

    /// Takes over events pushed by a neighbour bank.
    pub async fn accept_pushed(&self, digests: Vec<MessageDigest>, infos: &[EventPushInfo]) -> BankResult<usize> {
        self.ensure_loaded()?;
        let accepted = self.state.write().await.accept(digests, infos, now_secs())?;
        tracing::debug!("{}: accepted {} of {} pushed events", self.name, accepted, infos.len());
        Ok(accepted)
    }

    pub async fn status(&self) -> ShardStatus {
        self.state.read().await.status(self.is_loaded(), self.queue.len())
    }

    pub async fn langs(&self) -> BTreeSet<Lang> {
        self.state.read().await.langs.clone()
    }

    pub async fn add_lang(&self, lang: Lang) {
        if self.state.write().await.langs.insert(lang) {
            tracing::info!("{} now serves language {}", self.name, lang);
        }
    }

    pub async fn event_count(&self) -> usize {
        self.state.read().await.index.len()
    }

    /// Re-derive summaries and dissenters of every event while loading.
    pub async fn set_full_rebuild(&self, full_rebuild: bool) {
        self.state.write().await.full_rebuild = full_rebuild;
    }

    pub async fn give(&self, snapshot: &mut ShardSnapshot) {
        self.state.write().await.give(snapshot);
    }

    pub async fn take(&self, snapshot: &mut ShardSnapshot) {
        self.state.write().await.take(snapshot);
    }
}
