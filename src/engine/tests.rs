//! Clustering Engine Tests
//!
//! ## Test Scopes
//! - **Insertion & Merging**: singleton creation, idempotent inserts, merge cycle
//!   outcomes under size caps, denials, evicted core words and the time range cap.
//! - **Recomposition**: split at a time rift, separate by word, dissenter revision,
//!   remake (applied and dry run).
//! - **Maintenance**: message deletion followed by cleanup, traversal period tuning,
//!   snapshot handoff.
//! - **Push**: row deletion deferred across a store outage.
//! - **Manager**: loading (with corrupt rows), readiness, push delivery and rollback.
//! - **Introspection**: what-if relations.

#[cfg(test)]
mod tests {
    use crate::config::{BankConfig, CacheConfig, PeriodMaximization};
    use crate::engine::manager::EventManager;
    use crate::engine::peers::{BankPeers, BoxFuture, MessageEventSink, NoPeers};
    use crate::engine::state::{ShardState, TraverseState};
    use crate::engine::types::*;
    use crate::error::{BankError, BankResult};
    use crate::event::event::Event;
    use crate::event::types::*;
    use crate::executor::types::ShardTask;
    use crate::index::blacklist::HashPair;
    use crate::storage::codec::{encode_event, encode_message};
    use crate::storage::memory::MemoryStore;
    use crate::storage::store::{EventRecord, EventStore};

    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};

    const LANG: Lang = Lang(1);
    const NOW: u64 = 1_700_000_000;

    fn langs() -> BTreeSet<Lang> {
        [LANG].into_iter().collect()
    }

    fn shard(config: BankConfig) -> (ShardState, Arc<MemoryStore>) {
        let store = MemoryStore::new();
        let state = ShardState::new(langs(), Arc::new(config), store.clone());
        (state, store)
    }

    fn digest(id: u64, published: u64, words: &[WordId]) -> MessageDigest {
        MessageDigest {
            id: MessageId(id),
            published,
            lang: LANG,
            core_words: words.to_vec(),
            event_id: None,
        }
    }

    fn merge_all(state: &mut ShardState, now: u64) {
        for _ in 0..100 {
            if state.merge_step(now).unwrap().idle {
                return;
            }
        }
        panic!("merge cycle did not settle");
    }

    fn owner(state: &ShardState, id: u64) -> EventNumber {
        state.index.owner_of(MessageId(id)).unwrap()
    }

    fn sizes(state: &ShardState) -> Vec<usize> {
        let mut sizes: Vec<usize> = state.index.events().map(|(_, e)| e.size()).collect();
        sizes.sort_unstable();
        sizes
    }

    struct RecordingPeers {
        fail: bool,
        pushed: Mutex<Vec<(Side, PushPack)>>,
    }

    impl RecordingPeers {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                pushed: Mutex::new(Vec::new()),
            })
        }
    }

    impl BankPeers for RecordingPeers {
        fn bank_count(&self) -> usize {
            3
        }

        fn has_neighbour(&self) -> bool {
            true
        }

        fn push_events(&self, side: Side, pack: PushPack) -> BoxFuture<'_, BankResult<()>> {
            self.pushed.lock().unwrap().push((side, pack));
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    Err(BankError::transport("neighbour down"))
                } else {
                    Ok(())
                }
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<MessageEvent>>,
    }

    impl MessageEventSink for RecordingSink {
        fn post_message_events(&self, events: Vec<MessageEvent>) -> BoxFuture<'_, BankResult<()>> {
            self.events.lock().unwrap().extend(events);
            Box::pin(async { Ok(()) })
        }
    }

    async fn loaded_manager(
        config: BankConfig,
        store: Arc<MemoryStore>,
        peers: Arc<dyn BankPeers>,
    ) -> Arc<EventManager> {
        let manager = EventManager::new(
            langs(),
            Arc::new(config),
            store,
            peers,
            Arc::new(RecordingSink::default()),
        );

        for _ in 0..10 {
            if manager.is_loaded() {
                break;
            }
            manager.run_task(ShardTask::LoadEvents).await.unwrap();
        }

        assert!(manager.is_loaded());
        manager
    }

    // ============================================================
    // INSERTION & MERGING
    // ============================================================

    #[test]
    fn test_disjoint_digests_stay_singletons() {
        // ARRANGE
        let (mut state, store) = shard(BankConfig::default());
        let digests = vec![
            digest(1, NOW - 30, &[1, 2, 3, 4]),
            digest(2, NOW - 20, &[5, 6, 7, 8]),
            digest(3, NOW - 10, &[9, 10, 11, 12]),
        ];

        // ACT
        let owners = state.insert(&digests, NOW, true).unwrap();
        merge_all(&mut state, NOW);

        // ASSERT
        assert_eq!(owners.len(), 3);
        assert!(owners.iter().all(|o| o.event_id.is_some() && o.event_capacity == 1));
        assert_eq!(sizes(&state), vec![1, 1, 1]);
        assert_eq!(store.message_count(), 3);
    }

    #[test]
    fn test_insert_is_idempotent_and_skips_foreign_languages() {
        // ARRANGE
        let (mut state, _store) = shard(BankConfig::default());
        let first = state.insert(&[digest(1, NOW, &[1, 2, 3])], NOW, true).unwrap();

        let mut foreign = digest(2, NOW, &[1, 2, 3]);
        foreign.lang = Lang(9);

        // ACT
        let again = state
            .insert(&[digest(1, NOW, &[1, 2, 3]), foreign], NOW, true)
            .unwrap();

        // ASSERT
        assert_eq!(again[0], first[0]);
        assert_eq!(again[1], MessageEvent::unowned(MessageId(2)));
        assert_eq!(state.index.len(), 1);
    }

    #[test]
    fn test_identical_digests_merge_without_dissenters() {
        // ARRANGE
        let (mut state, _store) = shard(BankConfig::default());
        let words = [1, 2, 3, 4, 5];
        state
            .insert(&[digest(1, NOW - 1, &words), digest(2, NOW, &words)], NOW, true)
            .unwrap();

        // ACT
        merge_all(&mut state, NOW);

        // ASSERT
        assert_eq!(sizes(&state), vec![2]);
        let number = owner(&state, 1);
        assert_eq!(owner(&state, 2), number);

        let event = state.index.event(number).unwrap();
        assert_eq!(event.dissenters(), 0);
        assert_eq!(state.dissenters, 0);
        assert!(!state.blacklist.is_empty());

        let owners = state
            .owning_events(&[MessageId(1), MessageId(2)])
            .unwrap();
        assert!(owners.iter().all(|o| o.event_id == Some(event.id) && o.event_capacity == 2));
    }

    #[test]
    fn test_denial_of_old_shapes_does_not_block_new_member() {
        // ARRANGE
        let (mut state, _store) = shard(BankConfig::default());
        let words = [1, 2, 3, 4, 5];
        state
            .insert(&[digest(1, NOW - 2, &words), digest(2, NOW - 1, &words)], NOW, true)
            .unwrap();
        merge_all(&mut state, NOW);

        // ACT
        state.insert(&[digest(3, NOW, &words)], NOW, true).unwrap();
        merge_all(&mut state, NOW);

        // ASSERT: the merged sizes add up
        assert_eq!(sizes(&state), vec![3]);
        assert_eq!(owner(&state, 3), owner(&state, 1));
    }

    #[test]
    fn test_size_cap_blocks_merges() {
        // ARRANGE
        let mut config = BankConfig::default();
        config.event.max_size = 2;
        let (mut state, _store) = shard(config);
        let words = [1, 2, 3, 4, 5];

        state
            .insert(
                &[
                    digest(1, NOW - 2, &words),
                    digest(2, NOW - 1, &words),
                    digest(3, NOW, &words),
                ],
                NOW,
                true,
            )
            .unwrap();

        // ACT
        merge_all(&mut state, NOW);

        // ASSERT
        assert_eq!(sizes(&state), vec![1, 2]);
    }

    #[test]
    fn test_accept_adopts_pushed_events_once() {
        // ARRANGE
        let (mut state, store) = shard(BankConfig::default());
        let event_id = EventId::new();
        let mut digests = vec![digest(1, NOW - 5, &[1, 2, 3]), digest(2, NOW, &[1, 2, 3])];
        for d in digests.iter_mut() {
            d.event_id = Some(event_id);
        }
        let infos = vec![EventPushInfo {
            id: event_id,
            spin: 2,
            flags: EventFlags::REVISED.0,
            dissenters: 0,
        }];

        // ACT
        let accepted = state.accept(digests.clone(), &infos, NOW).unwrap();
        let again = state.accept(digests, &infos, NOW).unwrap();

        // ASSERT
        assert_eq!(accepted, 1);
        assert_eq!(again, 0);

        let number = state.index.number_of(&event_id).unwrap();
        let event = state.index.event(number).unwrap();
        assert_eq!(event.size(), 2);
        assert_eq!(event.spin, 2);
        assert!(event.flags.contains(EventFlags::DIRTY));
        assert!(!event.flags.contains(EventFlags::REVISED));
        assert_eq!(store.message_count(), 2);
    }

    #[test]
    fn test_event_with_evicted_members_still_merges() {
        // ARRANGE
        let (mut state, _store) = shard(BankConfig::default());
        let words = [1, 2, 3, 4, 5];
        state
            .insert(
                &[
                    digest(1, NOW - 3, &words),
                    digest(2, NOW - 2, &words),
                    digest(3, NOW - 1, &words),
                    digest(4, NOW, &words),
                ],
                NOW,
                true,
            )
            .unwrap();
        let first = merge_pair(&mut state, 1, 2);
        merge_pair(&mut state, 3, 4);

        state.changed.drain();
        state.cache.remove(&MessageId(1));
        state.cache.remove(&MessageId(2));
        assert!(state.queue_if_mergeable(first).unwrap());

        // ACT
        merge_all(&mut state, NOW);

        // ASSERT: the evicted words come back from the store for the merge check
        assert_eq!(sizes(&state), vec![4]);
        assert_eq!(owner(&state, 1), owner(&state, 3));
        assert!(state.cache.contains(&MessageId(1)));
    }

    #[test]
    fn test_merges_never_exceed_max_time_range() {
        // ARRANGE
        let config = BankConfig::default();
        let max_time_range = config.event.max_time_range;
        let (mut state, _store) = shard(config);
        let t0 = NOW - 7 * 86400;
        let step = 36 * 3600;
        let words = [1, 2, 3, 4, 5];
        let digests: Vec<MessageDigest> = (0..5)
            .map(|i| digest(i + 1, t0 + i * step, &words))
            .collect();
        state.insert(&digests, NOW, true).unwrap();

        // ACT
        merge_all(&mut state, NOW);

        // ASSERT: the 6 day chain merges, but never into a single event
        let sizes = sizes(&state);
        assert!(sizes.len() > 1);
        assert!(sizes.len() < 5);
        assert_eq!(sizes.iter().sum::<usize>(), 5);
        assert!(state.index.events().all(|(_, e)| e.time_range() <= max_time_range));
    }

    #[test]
    fn test_accepted_event_does_not_stretch_past_max_time_range() {
        // ARRANGE
        let config = BankConfig::default();
        let max_time_range = config.event.max_time_range;
        let (mut state, _store) = shard(config);
        let t0 = NOW - 7 * 86400;
        let words = [1, 2, 3, 4, 5];

        let event_id = EventId::new();
        let mut digests = vec![digest(11, t0, &words), digest(12, t0 + 4 * 86400, &words)];
        for d in digests.iter_mut() {
            d.event_id = Some(event_id);
        }
        let infos = vec![EventPushInfo {
            id: event_id,
            spin: 1,
            flags: EventFlags::CAN_MERGE.0,
            dissenters: 0,
        }];

        // ACT
        state.accept(digests, &infos, NOW).unwrap();
        state
            .insert(&[digest(13, t0 + 5 * 86400 + 43200, &words)], NOW, true)
            .unwrap();
        merge_all(&mut state, NOW);

        // ASSERT: 1.5 days apart, but the union would span 5.5 days
        let adopted = state.index.number_of(&event_id).unwrap();
        assert!(state.index.event(adopted).unwrap().flags.contains(EventFlags::CAN_MERGE));
        assert_eq!(sizes(&state), vec![1, 2]);
        assert_ne!(owner(&state, 13), adopted);
        assert!(state.index.events().all(|(_, e)| e.time_range() <= max_time_range));
    }

    // ============================================================
    // RECOMPOSITION
    // ============================================================

    /// Messages 1 and 2 (words 1..5) published at `t0` and messages 3 and 4 (words
    /// 6..10) at `t1`, glued into one event regardless of overlap.
    fn glued_event(state: &mut ShardState, t0: u64, t1: u64) -> EventNumber {
        let early = [1, 2, 3, 4, 5];
        let late = [6, 7, 8, 9, 10];

        state
            .insert(
                &[
                    digest(1, t0, &early),
                    digest(2, t0, &early),
                    digest(3, t1, &late),
                    digest(4, t1, &late),
                ],
                NOW,
                true,
            )
            .unwrap();

        let (n1, n2, n3, n4) = (owner(state, 1), owner(state, 2), owner(state, 3), owner(state, 4));
        state.merge_events(n1, n2, NOW).unwrap();
        state.merge_events(n3, n4, NOW).unwrap();
        state.merge_events(n4, n2, NOW).unwrap();
        n2
    }

    /// Two pairs of identical messages two days apart, glued into one event.
    fn rifted_event(state: &mut ShardState) -> EventNumber {
        let t0 = NOW - 200_000;
        glued_event(state, t0, t0 + 172_700)
    }

    fn merge_pair(state: &mut ShardState, a: u64, b: u64) -> EventNumber {
        let (src, dest) = (owner(state, a), owner(state, b));
        state.merge_events(src, dest, NOW).unwrap();
        dest
    }

    #[test]
    fn test_split_at_time_rift() {
        // ARRANGE
        let (mut state, _store) = shard(BankConfig::default());
        let number = rifted_event(&mut state);
        assert_eq!(state.index.event(number).unwrap().dissenters(), 4);
        assert_eq!(state.dissenters, 4);

        // ACT
        let expire = state.expire_time(NOW);
        let summary = state.revise_events(&[number], NOW, expire).unwrap();

        // ASSERT
        assert_eq!(summary.recomposed, 1);
        assert_eq!(sizes(&state), vec![2, 2]);
        assert_eq!(owner(&state, 1), owner(&state, 2));
        assert_eq!(owner(&state, 3), owner(&state, 4));
        assert_ne!(owner(&state, 1), owner(&state, 3));
        assert_eq!(state.dissenters, 0);

        // Both sides were written out.
        assert!(state.index.events().all(|(_, e)| !e.flags.contains(EventFlags::DIRTY)));
    }

    #[test]
    fn test_split_parts_do_not_merge_back() {
        // ARRANGE
        let (mut state, _store) = shard(BankConfig::default());
        let number = rifted_event(&mut state);
        let expire = state.expire_time(NOW);
        state.revise_events(&[number], NOW, expire).unwrap();

        // ACT
        merge_all(&mut state, NOW);

        // ASSERT
        assert_eq!(sizes(&state), vec![2, 2]);
    }

    #[test]
    fn test_separate_by_leading_word() {
        // ARRANGE: no time rift, two disjoint word groups
        let (mut state, _store) = shard(BankConfig::default());
        let number = glued_event(&mut state, NOW - 20, NOW - 10);
        assert_eq!(state.index.event(number).unwrap().size(), 4);

        // ACT
        let expire = state.expire_time(NOW);
        let summary = state.revise_events(&[number], NOW, expire).unwrap();

        // ASSERT
        assert_eq!(summary.recomposed, 1);
        assert_eq!(summary.detached, 0);
        assert_eq!(sizes(&state), vec![2, 2]);
        assert_eq!(owner(&state, 1), owner(&state, 2));
        assert_eq!(owner(&state, 3), owner(&state, 4));
        assert_ne!(owner(&state, 1), owner(&state, 3));
        assert_eq!(state.dissenters, 0);
    }

    #[test]
    fn test_revision_detaches_worst_dissenter_into_singleton() {
        // ARRANGE: too old for split or separate
        let (mut state, _store) = shard(BankConfig::default());
        let t0 = NOW - 4 * 86400;
        let words = [1, 2, 3, 4, 5];
        state
            .insert(
                &[
                    digest(1, t0, &words),
                    digest(2, t0 + 1, &words),
                    digest(3, t0 + 2, &words),
                    digest(4, t0 + 3, &[6, 7, 8, 9, 10]),
                ],
                NOW,
                true,
            )
            .unwrap();
        let number = merge_pair(&mut state, 1, 2);
        merge_pair(&mut state, 3, 2);
        merge_pair(&mut state, 4, 2);
        assert_eq!(state.index.event(number).unwrap().dissenters(), 1);
        state.take_updates(true);

        // ACT
        let expire = state.expire_time(NOW);
        let summary = state.revise_events(&[number], NOW, expire).unwrap();

        // ASSERT
        assert_eq!(summary.recomposed, 0);
        assert_eq!(summary.detached, 1);
        assert_eq!(sizes(&state), vec![1, 3]);
        assert_eq!(owner(&state, 1), number);
        assert_ne!(owner(&state, 4), number);
        assert_eq!(state.index.event(number).unwrap().dissenters(), 0);
        assert_eq!(state.dissenters, 0);

        let single = state.index.event(owner(&state, 4)).unwrap();
        assert_eq!(single.messages()[0].published, t0 + 3);
        let single_id = single.id;

        let updates = state.take_updates(true);
        let moved = updates.iter().find(|u| u.id == MessageId(4)).unwrap();
        assert_eq!(moved.event_id, Some(single_id));
        assert_eq!(moved.event_capacity, 1);
    }

    /// A revised event of two disjoint pairs next to an event matching its second pair.
    fn remake_setup(config: BankConfig) -> (ShardState, EventNumber, EventNumber) {
        let (mut state, _store) = shard(config);
        let number = glued_event(&mut state, NOW - 20, NOW - 10);
        state
            .insert(
                &[digest(5, NOW - 5, &[6, 7, 8, 9, 10]), digest(6, NOW, &[6, 7, 8, 9, 10])],
                NOW,
                true,
            )
            .unwrap();
        let neighbour = merge_pair(&mut state, 5, 6);

        // As if revision had cleared it, and the denial of the glued halves had lapsed.
        state.index.event_mut(number).unwrap().flags.insert(EventFlags::REVISED);
        state.blacklist.drain();

        (state, number, neighbour)
    }

    #[test]
    fn test_remake_moves_part_to_better_fitting_event() {
        // ARRANGE
        let (mut state, number, neighbour) = remake_setup(BankConfig::default());

        // ACT
        state.remake_traverse(NOW).unwrap();

        // ASSERT
        assert_eq!(sizes(&state), vec![2, 4]);
        assert_eq!(owner(&state, 1), number);
        assert_eq!(owner(&state, 2), number);
        assert_eq!(owner(&state, 3), neighbour);
        assert_eq!(owner(&state, 4), neighbour);

        let parent = state.index.event(number).unwrap();
        let grown = state.index.event(neighbour).unwrap();
        let pair = HashPair::new(parent.hash(), grown.hash(), LANG);
        assert!(state.blacklist.is_denied(&pair, NOW));
    }

    #[test]
    fn test_remake_dry_run_changes_nothing() {
        // ARRANGE
        let mut config = BankConfig::default();
        config.event_remake.dry_run = true;
        let (mut state, number, neighbour) = remake_setup(config);

        // ACT
        state.remake_traverse(NOW).unwrap();

        // ASSERT
        assert_eq!(state.index.event(number).unwrap().size(), 4);
        assert_eq!(owner(&state, 3), number);
        assert_eq!(state.index.event(neighbour).unwrap().size(), 2);
        assert!(state.blacklist.is_empty());
    }

    // ============================================================
    // MAINTENANCE
    // ============================================================

    #[test]
    fn test_deleted_message_is_cleaned_up_by_traversal() {
        // ARRANGE
        let (mut state, store) = shard(BankConfig::default());
        let words = [1, 2, 3, 4, 5];
        state
            .insert(&[digest(1, NOW - 1, &words), digest(2, NOW, &words)], NOW, true)
            .unwrap();
        merge_all(&mut state, NOW);
        state.take_updates(true);

        // ACT
        let detached = state.delete_messages(&[MessageId(1), MessageId(77)]).unwrap();
        let pass = state.traverse(NOW, false).unwrap();

        // ASSERT
        assert_eq!(detached, 1);
        assert_eq!(pass.obsolete, 1);
        assert!(state.index.owner_of(MessageId(1)).is_none());
        assert_eq!(state.index.event(owner(&state, 2)).unwrap().size(), 1);
        assert_eq!(store.message_count(), 1);

        let updates = state.take_updates(true);
        assert!(updates.contains(&MessageEvent::unowned(MessageId(1))));
    }

    #[test]
    fn test_traverse_period_grows_with_backlog_and_resets() {
        // ARRANGE
        let config = CacheConfig {
            traverse_period_min: 5,
            traverse_period_max: 60,
            traverse_period_maximization: PeriodMaximization::Dbl,
            ..CacheConfig::default()
        };
        let mut traverse = TraverseState::new(&config);

        // ACT & ASSERT: nothing changes until the history is full
        for changed in 1..20 {
            traverse.tune(changed, &config);
            assert_eq!(traverse.period, 5);
        }

        traverse.tune(20, &config);
        assert_eq!(traverse.period, 10);

        traverse.tune(21, &config);
        assert_eq!(traverse.period, 20);

        traverse.tune(0, &config);
        assert_eq!(traverse.period, 5);
    }

    #[test]
    fn test_traverse_period_increment_policy() {
        // ARRANGE
        let config = CacheConfig {
            traverse_period_min: 5,
            traverse_period_max: 6,
            traverse_period_maximization: PeriodMaximization::Inc,
            ..CacheConfig::default()
        };
        let mut traverse = TraverseState::new(&config);

        // ACT
        for changed in 1..=22 {
            traverse.tune(changed, &config);
        }

        // ASSERT: capped at the maximum
        assert_eq!(traverse.period, 6);
    }

    #[test]
    fn test_give_and_take_move_state_by_language() {
        // ARRANGE
        let (mut source, _store) = shard(BankConfig::default());
        source
            .insert(&[digest(1, NOW, &[1, 2, 3]), digest(2, NOW, &[4, 5, 6])], NOW, true)
            .unwrap();

        let store = MemoryStore::new();
        let mut other = ShardState::new(
            [Lang(2)].into_iter().collect(),
            Arc::new(BankConfig::default()),
            store.clone(),
        );
        let (mut target, _store) = shard(BankConfig::default());

        // ACT
        let mut snapshot = ShardSnapshot::default();
        source.give(&mut snapshot);
        other.take(&mut snapshot);
        target.take(&mut snapshot);

        // ASSERT
        assert!(source.changed.is_empty());
        assert!(other.changed.is_empty());
        assert_eq!(target.changed.len(), 2);
        assert!(snapshot.changed.is_empty());
    }

    // ============================================================
    // PUSH
    // ============================================================

    #[test]
    fn test_pushed_rows_are_deleted_once_store_recovers() {
        // ARRANGE
        let (mut state, store) = shard(BankConfig::default());
        let words = [1, 2, 3, 4, 5];
        state
            .insert(&[digest(1, NOW - 1, &words), digest(2, NOW, &words)], NOW, true)
            .unwrap();
        merge_all(&mut state, NOW);
        state.flush_dirty().unwrap();

        let number = owner(&state, 1);
        let id = state.index.event(number).unwrap().id;
        state.mark_push(&[number], NOW).unwrap();
        store.set_available(false);

        // ACT
        let completed = state.complete_push(&[id], true).unwrap();

        // ASSERT: the event is gone, its rows wait for the store
        assert_eq!(completed, 1);
        assert!(state.index.is_empty());
        assert!(state.index.owner_of(MessageId(1)).is_none());
        assert!(!state.stale_rows.is_empty());
        assert_eq!(store.event_count(), 1);
        assert_eq!(store.message_count(), 2);

        store.set_available(true);
        state.traverse(NOW, false).unwrap();

        assert!(state.stale_rows.is_empty());
        assert_eq!(store.event_count(), 0);
        assert_eq!(store.message_count(), 0);
    }

    // ============================================================
    // MANAGER
    // ============================================================

    #[tokio::test]
    async fn test_rpcs_fail_until_loaded() {
        // ARRANGE
        let manager = EventManager::new(
            langs(),
            Arc::new(BankConfig::default()),
            MemoryStore::new(),
            Arc::new(NoPeers),
            Arc::new(RecordingSink::default()),
        );

        // ACT
        let posted = manager.post_digests(&[digest(1, now_secs(), &[1, 2, 3])]).await;
        let deleted = manager.delete_messages(vec![MessageId(1)]);
        let owners = manager.get_owning_events(&[MessageId(1)]).await;

        // ASSERT
        assert!(posted.unwrap_err().is_not_ready());
        assert!(deleted.unwrap_err().is_not_ready());
        assert!(owners.unwrap_err().is_not_ready());
    }

    #[tokio::test]
    async fn test_load_drops_corrupt_rows_and_orphan_messages() {
        // ARRANGE
        let store = MemoryStore::new();
        let now = now_secs();

        let mut event = Event::new(EventId::new(), LANG);
        event.set_messages(vec![MessageInfo {
            id: MessageId(10),
            published: now - 100,
        }]);
        store.upsert_events(vec![encode_event(&event).unwrap()]).unwrap();
        store
            .upsert_events(vec![EventRecord {
                id: EventId::new(),
                lang: LANG,
                blob: vec![1, 0xff],
            }])
            .unwrap();
        store
            .upsert_messages(vec![
                encode_message(MessageId(10), LANG, &[1, 2, 3]).unwrap(),
                encode_message(MessageId(99), LANG, &[4, 5, 6]).unwrap(),
            ])
            .unwrap();

        // ACT
        let manager = loaded_manager(BankConfig::default(), store.clone(), Arc::new(NoPeers)).await;

        // ASSERT
        assert_eq!(store.event_count(), 1);
        assert!(store.get_event(&event.id).is_some());
        assert_eq!(store.message_count(), 1);

        let (owners, total) = manager.get_owning_events(&[MessageId(10)]).await.unwrap();
        assert_eq!(owners[0].event_id, Some(event.id));
        assert_eq!(total, 1);
        assert!(manager.queue().contains(&ShardTask::MergeEvents));
    }

    #[tokio::test]
    async fn test_pushed_events_leave_the_bank() {
        // ARRANGE
        let mut config = BankConfig::default();
        config.event_cache.push_out_prc_per_hour = 1e9;
        let store = MemoryStore::new();
        let peers = RecordingPeers::new(false);
        let manager = loaded_manager(config, store.clone(), peers.clone()).await;

        let now = now_secs();
        manager
            .post_digests(&[digest(1, now - 10, &[1, 2, 3]), digest(2, now, &[4, 5, 6])])
            .await
            .unwrap();

        // ACT
        manager.run_task(ShardTask::TraverseEvents).await.unwrap();

        // ASSERT
        let pushed: Vec<(Side, PushPack)> = peers.pushed.lock().unwrap().drain(..).collect();
        let events: usize = pushed.iter().map(|(_, pack)| pack.events.len()).sum();
        let digests: usize = pushed.iter().map(|(_, pack)| pack.digests.len()).sum();
        assert_eq!(events, 2);
        assert_eq!(digests, 2);
        for (side, pack) in pushed.iter() {
            for info in pack.events.iter() {
                match side {
                    Side::Left => assert_eq!(info.spin, -2),
                    Side::Right => assert_eq!(info.spin, 2),
                }
            }
        }

        let status = manager.status().await;
        assert_eq!(status.events, 0);
        assert_eq!(store.message_count(), 0);
        assert!(manager.queue().contains(&ShardTask::TraverseEvents));
    }

    #[tokio::test]
    async fn test_failed_push_rolls_back() {
        // ARRANGE
        let mut config = BankConfig::default();
        config.event_cache.push_out_prc_per_hour = 1e9;
        let peers = RecordingPeers::new(true);
        let manager = loaded_manager(config, MemoryStore::new(), peers.clone()).await;

        let now = now_secs();
        let owners = manager
            .post_digests(&[digest(1, now - 10, &[1, 2, 3]), digest(2, now, &[4, 5, 6])])
            .await
            .unwrap();

        // ACT
        manager.run_task(ShardTask::TraverseEvents).await.unwrap();

        // ASSERT
        assert!(!peers.pushed.lock().unwrap().is_empty());
        assert_eq!(manager.status().await.events, 2);

        let queries: Vec<EventQuery> = owners
            .iter()
            .map(|o| EventQuery {
                id: o.event_id.unwrap(),
                relation: None,
                split: None,
                separate: None,
            })
            .collect();
        let relations = manager.get_events(&queries).await.unwrap();
        assert_eq!(relations.len(), 2);
        for relation in relations {
            assert!(!relation.event.flags.contains('P'));
            assert!(relation.event.flags.contains('M'));
        }
    }

    #[tokio::test]
    async fn test_stop_flushes_dirty_events_and_rejects_requests() {
        // ARRANGE
        let store = MemoryStore::new();
        let manager = loaded_manager(BankConfig::default(), store.clone(), Arc::new(NoPeers)).await;
        manager
            .post_digests(&[digest(1, now_secs(), &[1, 2, 3])])
            .await
            .unwrap();

        // ACT
        let flushed = manager.stop().await.unwrap();

        // ASSERT
        assert_eq!(flushed, 1);
        assert_eq!(store.event_count(), 1);
        assert!(manager.queue().is_stopped());
        assert!(manager.delete_messages(vec![MessageId(1)]).unwrap_err().is_not_ready());
    }

    // ============================================================
    // INTROSPECTION
    // ============================================================

    #[test]
    fn test_relation_shows_hypothetical_merge() {
        // ARRANGE
        let (mut state, _store) = shard(BankConfig::default());
        let words = [1, 2, 3, 4, 5];
        let owners = state
            .insert(&[digest(1, NOW - 1, &words), digest(2, NOW, &words)], NOW, true)
            .unwrap();
        let (id1, id2) = (owners[0].event_id.unwrap(), owners[1].event_id.unwrap());

        // ACT
        let relations = state
            .get_events(
                &[
                    EventQuery {
                        id: id1,
                        relation: Some(id2),
                        split: None,
                        separate: None,
                    },
                    EventQuery {
                        id: EventId::new(),
                        relation: None,
                        split: None,
                        separate: None,
                    },
                ],
                NOW,
            )
            .unwrap();

        // ASSERT: unknown ids are left out, nothing is applied
        assert_eq!(relations.len(), 1);
        let relation = relations[0].relation.as_ref().unwrap();
        assert_eq!(relation.event.id, id2);
        assert_eq!(relation.overlap, 100);
        assert_eq!(relation.merge_result.messages.len(), 2);
        assert_eq!(relation.merge_result.dissenters, 0);
        assert_eq!(state.index.len(), 2);
    }

    #[test]
    fn test_separate_what_if_partitions_by_word() {
        // ARRANGE
        let (mut state, _store) = shard(BankConfig::default());
        let number = rifted_event(&mut state);
        let id = state.index.event(number).unwrap().id;

        // ACT
        let relations = state
            .get_events(
                &[EventQuery {
                    id,
                    relation: None,
                    split: Some(MessageId(1)),
                    separate: Some(SeparateRequest {
                        word_id: 6,
                        narrow: true,
                    }),
                }],
                NOW,
            )
            .unwrap();

        // ASSERT
        let separate = relations[0].separate.as_ref().unwrap();
        let part1: Vec<MessageId> = separate.part1.as_ref().unwrap().messages.iter().map(|m| m.id).collect();
        assert_eq!(part1, vec![MessageId(3), MessageId(4)]);
        assert_eq!(separate.part2.as_ref().unwrap().messages.len(), 2);

        // Newest first, cut right before message 1.
        let split = relations[0].split.as_ref().unwrap();
        assert_eq!(split.part2.as_ref().unwrap().messages.len(), 2);
        assert_eq!(state.index.len(), 1);
    }
}
