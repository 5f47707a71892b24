//! Bank Service
//!
//! Owns the session state machine and routes every RPC to the engine serving the
//! message's language.

use super::directory::Directory;
use super::snapshot;
use super::types::*;
use crate::bank::client::PeerClient;
use crate::config::BankConfig;
use crate::engine::manager::EventManager;
use crate::engine::peers::{BankPeers, MessageEventSink, NoPeers};
use crate::engine::types::*;
use crate::error::{BankError, BankResult};
use crate::event::types::*;
use crate::storage::store::EventStore;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;

struct ActiveSession {
    session_id: String,
    neighbours: Neighbours,
    peers: Arc<dyn BankPeers>,
    engines: Vec<Arc<EventManager>>,
    by_lang: HashMap<Lang, Arc<EventManager>>,
}

pub struct BankService {
    config: Arc<BankConfig>,
    bank_addr: String,
    store: Arc<dyn EventStore>,
    directory: Arc<dyn Directory>,
    sink: Arc<dyn MessageEventSink>,
    http_client: reqwest::Client,
    session: RwLock<Option<ActiveSession>>,
    shutdown: Notify,
    stopping: AtomicBool,
}

impl BankService {
    pub fn new(
        config: Arc<BankConfig>,
        bank_addr: impl Into<String>,
        store: Arc<dyn EventStore>,
        directory: Arc<dyn Directory>,
        sink: Arc<dyn MessageEventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            bank_addr: bank_addr.into(),
            store,
            directory,
            sink,
            http_client: reqwest::Client::new(),
            session: RwLock::new(None),
            shutdown: Notify::new(),
            stopping: AtomicBool::new(false),
        })
    }

    pub async fn state(&self) -> SessionState {
        if self.session.read().await.is_some() {
            SessionState::Active
        } else {
            SessionState::LoggingIn
        }
    }

    /// Spawns the session loop: log in, then report presence until the directory
    /// says otherwise or the service shuts down.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            service.session_loop().await;
        })
    }

    async fn session_loop(self: Arc<Self>) {
        tracing::info!("Bank {} starting session loop", self.bank_addr);
        let session = &self.config.session;

        loop {
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }

            let delay = match self.state().await {
                SessionState::LoggingIn => match self.login().await {
                    Ok(()) => session.report_presence_period,
                    Err(e) => {
                        tracing::warn!("Login failed, retrying in {}s: {}", session.login_retry_period, e);
                        session.login_retry_period
                    }
                },
                SessionState::Active => match self.report_presence().await {
                    Ok(Presence::Alive) => session.report_presence_period,
                    Ok(Presence::Logout) => session.login_retry_period,
                    Err(e) => {
                        tracing::warn!("Presence report failed: {}", e);
                        session.report_presence_period
                    }
                },
            };

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                _ = self.shutdown.notified() => break,
            }
        }

        tracing::info!("Session loop of {} finished", self.bank_addr);
    }

    /// Obtains a session, builds one engine per language group and starts them.
    pub async fn login(&self) -> BankResult<()> {
        let session = self.directory.login(&self.bank_addr).await?;
        let neighbours = Neighbours::of(&session, &self.bank_addr);

        let peers: Arc<dyn BankPeers> = if neighbours.is_alone() {
            Arc::new(NoPeers)
        } else {
            Arc::new(PeerClient::new(
                self.http_client.clone(),
                neighbours.clone(),
                session.banks.len(),
            ))
        };

        let groups = partition_langs(self.store.event_counts()?, self.config.session.backets);
        let engines: Vec<Arc<EventManager>> = groups
            .into_iter()
            .map(|langs| self.new_engine(langs, &peers))
            .collect();

        if self.stopping.load(Ordering::SeqCst) {
            return Err(BankError::not_ready("bank is shutting down"));
        }

        let mut leftover = None;
        match snapshot::restore(self.config.snapshot_path()) {
            Some(mut restored) => {
                for engine in &engines {
                    engine.take(&mut restored).await;
                }
                if !restored.is_empty() {
                    tracing::debug!(
                        "Snapshot entries of {} changed events left without an engine",
                        restored.changed.len()
                    );
                }
                leftover = Some(restored);
            }
            None => {
                for engine in &engines {
                    engine.set_full_rebuild(true).await;
                }
            }
        }

        let mut guard = self.session.write().await;
        if self.stopping.load(Ordering::SeqCst) {
            // Shutdown raced the login: hand the restored state back to the file.
            drop(guard);
            if let Some(mut leftover) = leftover {
                for engine in &engines {
                    engine.give(&mut leftover).await;
                }
                snapshot::save(self.config.snapshot_path(), &leftover)?;
            }
            return Err(BankError::not_ready("bank is shutting down"));
        }

        let mut by_lang = HashMap::new();
        for engine in &engines {
            for lang in engine.langs().await {
                by_lang.insert(lang, engine.clone());
            }
            engine.start();
        }

        tracing::info!(
            "Logged in as {} (session {}), {} banks, {} engines, neighbours {:?}",
            self.bank_addr,
            session.session_id,
            session.banks.len(),
            engines.len(),
            neighbours
        );

        *guard = Some(ActiveSession {
            session_id: session.session_id,
            neighbours,
            peers,
            engines,
            by_lang,
        });
        Ok(())
    }

    /// Pings the directory. A logout verdict tears the session down.
    pub async fn report_presence(&self) -> BankResult<Presence> {
        let session_id = match self.session.read().await.as_ref() {
            Some(session) => session.session_id.clone(),
            None => return Err(logging_in()),
        };

        let presence = self.directory.ping(&self.bank_addr, &session_id).await?;
        if presence == Presence::Logout {
            tracing::warn!("Directory logged out session {}", session_id);
            self.teardown().await?;
        }
        Ok(presence)
    }

    /// Stops every engine, flushing its dirty events, and saves the merged
    /// changed-event and denial state for the next login.
    pub async fn teardown(&self) -> BankResult<()> {
        let Some(session) = self.session.write().await.take() else {
            return Ok(());
        };

        let mut handoff = ShardSnapshot::default();
        for engine in &session.engines {
            if let Err(e) = engine.stop().await {
                tracing::error!("{}: final flush failed: {}", engine.name(), e);
            }
            engine.give(&mut handoff).await;
        }

        snapshot::save(self.config.snapshot_path(), &handoff)?;
        tracing::info!(
            "Session {} closed, {} engines stopped",
            session.session_id,
            session.engines.len()
        );
        Ok(())
    }

    pub async fn shutdown(&self) -> BankResult<()> {
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
        self.teardown().await
    }

    fn new_engine(&self, langs: BTreeSet<Lang>, peers: &Arc<dyn BankPeers>) -> Arc<EventManager> {
        EventManager::new(
            langs,
            self.config.clone(),
            self.store.clone(),
            peers.clone(),
            self.sink.clone(),
        )
    }

    // ROUTING
    // ============================================================

    async fn ensure_active(&self) -> BankResult<()> {
        match self.state().await {
            SessionState::Active => Ok(()),
            SessionState::LoggingIn => Err(logging_in()),
        }
    }

    async fn engines(&self) -> BankResult<Vec<Arc<EventManager>>> {
        match self.session.read().await.as_ref() {
            Some(session) => Ok(session.engines.clone()),
            None => Err(logging_in()),
        }
    }

    /// Engine serving `lang`. An unseen language gets its own engine while there is
    /// room for one, otherwise it joins the engine with the fewest events.
    async fn engine_for(&self, lang: Lang) -> BankResult<Arc<EventManager>> {
        {
            let guard = self.session.read().await;
            let session = guard.as_ref().ok_or_else(logging_in)?;
            if let Some(engine) = session.by_lang.get(&lang) {
                return Ok(engine.clone());
            }
        }

        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or_else(logging_in)?;
        if let Some(engine) = session.by_lang.get(&lang) {
            return Ok(engine.clone());
        }

        let engine = if session.engines.len() < self.config.session.backets {
            let engine = self.new_engine(BTreeSet::from([lang]), &session.peers);
            engine.start();
            session.engines.push(engine.clone());
            tracing::info!("Created {} for a new language", engine.name());
            engine
        } else {
            let mut least: Option<(usize, Arc<EventManager>)> = None;
            for engine in &session.engines {
                let count = engine.event_count().await;
                if least.as_ref().is_none_or(|(c, _)| count < *c) {
                    least = Some((count, engine.clone()));
                }
            }
            let (_, engine) = least.ok_or_else(|| BankError::invariant("no engine to add a language to"))?;
            engine.add_lang(lang).await;
            engine
        };

        session.by_lang.insert(lang, engine.clone());
        Ok(engine)
    }

    // RPC ENTRY POINTS
    // ============================================================

    /// Owners of the digests, in input order.
    pub async fn post_digests(&self, digests: Vec<MessageDigest>) -> BankResult<Vec<MessageEvent>> {
        self.ensure_active().await?;
        let mut by_lang: BTreeMap<Lang, Vec<usize>> = BTreeMap::new();
        for (i, digest) in digests.iter().enumerate() {
            by_lang.entry(digest.lang).or_default().push(i);
        }

        let mut owners: Vec<MessageEvent> = digests.iter().map(|d| MessageEvent::unowned(d.id)).collect();

        for (lang, positions) in by_lang {
            let engine = self.engine_for(lang).await?;
            let batch: Vec<MessageDigest> = positions.iter().map(|&i| digests[i].clone()).collect();
            let events = engine.post_digests(&batch).await?;
            for (i, event) in positions.into_iter().zip(events) {
                owners[i] = event;
            }
        }

        Ok(owners)
    }

    /// Owners of the messages across all engines, with the total number of messages
    /// this bank holds.
    pub async fn get_owning_events(&self, ids: &[MessageId]) -> BankResult<(Vec<MessageEvent>, u64)> {
        let mut owners: Vec<MessageEvent> = ids.iter().map(|id| MessageEvent::unowned(*id)).collect();
        let mut total = 0;

        for engine in self.engines().await? {
            let (events, count) = engine.get_owning_events(ids).await?;
            total += count;
            for (owner, event) in owners.iter_mut().zip(events) {
                if event.event_id.is_some() {
                    *owner = event;
                }
            }
        }

        Ok((owners, total))
    }

    pub async fn delete_messages(&self, ids: Vec<MessageId>) -> BankResult<()> {
        for engine in self.engines().await? {
            engine.delete_messages(ids.clone())?;
        }
        Ok(())
    }

    pub async fn get_events(&self, queries: &[EventQuery]) -> BankResult<Vec<EventRelation>> {
        let mut relations = Vec::new();
        for engine in self.engines().await? {
            relations.extend(engine.get_events(queries).await?);
        }
        Ok(relations)
    }

    /// Hands pushed events to the engines of their languages. Returns the number of
    /// events adopted.
    pub async fn accept_pushed(&self, digests: Vec<MessageDigest>, infos: Vec<EventPushInfo>) -> BankResult<usize> {
        self.ensure_active().await?;
        let mut event_langs: HashMap<EventId, Lang> = HashMap::new();
        let mut digests_by_lang: BTreeMap<Lang, Vec<MessageDigest>> = BTreeMap::new();
        for digest in digests {
            if let Some(event_id) = digest.event_id {
                event_langs.insert(event_id, digest.lang);
            }
            digests_by_lang.entry(digest.lang).or_default().push(digest);
        }

        let mut infos_by_lang: BTreeMap<Lang, Vec<EventPushInfo>> = BTreeMap::new();
        for info in infos {
            match event_langs.get(&info.id) {
                Some(lang) => infos_by_lang.entry(*lang).or_default().push(info),
                None => tracing::debug!("Pushed event {} arrived without members", info.id),
            }
        }

        let mut accepted = 0;
        for (lang, infos) in infos_by_lang {
            let digests = digests_by_lang.remove(&lang).unwrap_or_default();
            let engine = self.engine_for(lang).await?;
            accepted += engine.accept_pushed(digests, &infos).await?;
        }

        Ok(accepted)
    }

    pub async fn status(&self) -> BankStatus {
        let guard = self.session.read().await;
        let Some(session) = guard.as_ref() else {
            return BankStatus {
                state: SessionState::LoggingIn,
                bank_addr: self.bank_addr.clone(),
                session_id: None,
                neighbours: Neighbours::default(),
                shards: Vec::new(),
            };
        };

        let mut shards = Vec::with_capacity(session.engines.len());
        for engine in &session.engines {
            shards.push(engine.status().await);
        }

        BankStatus {
            state: SessionState::Active,
            bank_addr: self.bank_addr.clone(),
            session_id: Some(session.session_id.clone()),
            neighbours: session.neighbours.clone(),
            shards,
        }
    }
}

fn logging_in() -> BankError {
    BankError::not_ready("still logging in")
}

/// Groups languages into at most `backets` engines. Languages are taken largest
/// first; the first `backets` open their own group, every further one joins the
/// group with the fewest events so far.
pub fn partition_langs(mut counts: Vec<(Lang, u64)>, backets: usize) -> Vec<BTreeSet<Lang>> {
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut groups: Vec<(BTreeSet<Lang>, u64)> = Vec::new();
    for (lang, count) in counts {
        if groups.len() < backets {
            groups.push((BTreeSet::from([lang]), count));
            continue;
        }

        if let Some(group) = groups.iter_mut().min_by_key(|(_, total)| *total) {
            group.0.insert(lang);
            group.1 += count;
        }
    }

    groups.into_iter().map(|(langs, _)| langs).collect()
}
