//! Live session coordinator.
//!
//! Owns everything the merge engine pushes to its boundary:
//!
//! - **Per-block exclusion** — one `tokio::sync::Mutex` per block covers both
//!   the append path and the commit path, so the pending set is never mutated
//!   and drained concurrently.
//! - **Debounced commit** — each append schedules a commit after a quiet
//!   period; a newer append supersedes any still-sleeping one. Cancellation
//!   is generation-based, not task-abort: a commit that already started is
//!   never interrupted mid-merge.
//! - **Lazy seeding** — the first append for a block loads the persisted
//!   `(content, revision)` pair from the repository.
//! - **Event bus** — subscribers hear about appended changes, commits, and
//!   stalls over a broadcast channel.
//!
//! # Concurrency Model
//!
//! - DashMap for concurrent slot lookup
//! - tokio Mutex per slot for the working state
//! - broadcast channel for change/commit notification

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{broadcast, Mutex};

use scrawl_merge::{process, Change, LiveSession, LiveUpdates, MergeError, MergeOutcome, Revision};

use crate::repo::{BlockKey, BlockRepository};
use crate::Result;

/// Coordinator tuning.
#[derive(Clone, Debug)]
pub struct LiveConfig {
    /// Quiet period after the last append before a commit fires.
    pub debounce: Duration,
    /// Surface merge conflicts instead of logging and stalling.
    pub strict: bool,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            strict: false,
            event_capacity: 256,
        }
    }
}

/// Events broadcast as blocks change.
#[derive(Clone, Debug)]
pub enum LiveEvent {
    /// A change joined a block's pending set.
    ChangeAppended { key: BlockKey, revision: Revision },
    /// A merge committed; `revision` is the new persisted tag.
    Committed { key: BlockKey, revision: Revision },
    /// A commit could only partially resolve; these revisions are waiting.
    Stalled { key: BlockKey, unresolved: Vec<Revision> },
}

/// Per-block slot: working state plus debounce bookkeeping.
struct BlockSlot {
    /// Working state, guarded by the per-block mutex.
    state: Mutex<LiveUpdates>,
    /// Debounce generation. Every append and commit bumps it; a sleeping
    /// commit task fires only if its generation is still current.
    generation: AtomicU64,
    /// Last session to touch this block.
    last_session: RwLock<LiveSession>,
}

/// Shared cache of live working sets with debounced persistence.
pub struct LiveStore<R> {
    repo: R,
    slots: DashMap<BlockKey, Arc<BlockSlot>>,
    config: LiveConfig,
    event_tx: broadcast::Sender<LiveEvent>,
}

impl<R: BlockRepository> LiveStore<R> {
    /// Create a coordinator over the given repository.
    pub fn new(repo: R, config: LiveConfig) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        Arc::new(Self {
            repo,
            slots: DashMap::new(),
            config,
            event_tx,
        })
    }

    /// Subscribe to block events.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.event_tx.subscribe()
    }

    /// The underlying repository.
    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Append an editor's change to a block's pending set and (re)schedule
    /// the debounced commit.
    pub async fn append_change(self: &Arc<Self>, key: &BlockKey, change: Change) -> Result<()> {
        let slot = self.slot(key).await?;

        let revision = change.revision.clone();
        {
            let mut state = slot.state.lock().await;
            *slot.last_session.write() = change.live_session.clone();
            state.append(change);
        }
        let _ = self.event_tx.send(LiveEvent::ChangeAppended {
            key: key.clone(),
            revision,
        });

        self.schedule_commit(key.clone(), slot);
        Ok(())
    }

    /// Commit a block's pending set right now, bypassing the debounce.
    ///
    /// Returns the merge outcome, or `None` when nothing was pending.
    pub async fn flush(&self, key: &BlockKey) -> Result<Option<MergeOutcome>> {
        match self.slots.get(key).map(|s| s.clone()) {
            Some(slot) => self.commit(key, &slot).await,
            None => Ok(None),
        }
    }

    /// Snapshot of a block's working state, if it is live.
    pub async fn working(&self, key: &BlockKey) -> Option<LiveUpdates> {
        let slot = self.slots.get(key).map(|s| s.clone())?;
        let state = slot.state.lock().await;
        Some(state.clone())
    }

    /// Last session to touch a block, if it is live.
    pub fn last_session(&self, key: &BlockKey) -> Option<LiveSession> {
        self.slots.get(key).map(|s| s.last_session.read().clone())
    }

    /// Drop a block's working state from the cache.
    ///
    /// Pending changes are discarded; callers normally [`Self::flush`] first.
    pub fn evict(&self, key: &BlockKey) {
        self.slots.remove(key);
    }

    /// Get or lazily seed the slot for a block.
    async fn slot(&self, key: &BlockKey) -> Result<Arc<BlockSlot>> {
        if let Some(slot) = self.slots.get(key) {
            return Ok(slot.clone());
        }

        let persisted = self.repo.load(key).await?;
        let seeded = Arc::new(BlockSlot {
            state: Mutex::new(LiveUpdates::new(
                key.class.clone(),
                key.id.clone(),
                persisted.content,
                persisted.revision,
            )),
            generation: AtomicU64::new(0),
            last_session: RwLock::new(LiveSession::new()),
        });

        // Two appends can race the load; the entry API keeps the winner.
        Ok(self.slots.entry(key.clone()).or_insert(seeded).clone())
    }

    /// Schedule a commit after the quiet period, superseding earlier ones.
    fn schedule_commit(self: &Arc<Self>, key: BlockKey, slot: Arc<BlockSlot>) {
        let generation = slot.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let store = Arc::clone(self);
        let quiet = self.config.debounce;

        tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            if slot.generation.load(Ordering::SeqCst) != generation {
                // Superseded by a newer append (or an explicit flush).
                return;
            }
            // A task that passes this check just as another append lands may
            // commit that change early; the superseding task then finds an
            // empty pending set and does nothing. Harmless either way — what
            // must never happen is interrupting a commit mid-merge, and
            // nothing here aborts tasks.
            if let Err(err) = store.commit(&key, &slot).await {
                tracing::warn!(%key, %err, "debounced commit failed");
            }
        });
    }

    /// Merge, persist, drain. Holds the per-block mutex throughout.
    async fn commit(&self, key: &BlockKey, slot: &Arc<BlockSlot>) -> Result<Option<MergeOutcome>> {
        let mut state = slot.state.lock().await;
        if !state.has_pending() {
            return Ok(None);
        }
        // Invalidate any still-sleeping debounce task; this commit drains
        // everything they were scheduled for.
        slot.generation.fetch_add(1, Ordering::SeqCst);

        match process(&state, self.config.strict) {
            Ok(outcome) => {
                self.repo.save(key, &outcome.content, &outcome.revision).await?;
                state.content = outcome.content.clone();
                state.revision = outcome.revision.clone();
                state.pending.clear();
                tracing::debug!(%key, revision = %outcome.revision, "committed");
                let _ = self.event_tx.send(LiveEvent::Committed {
                    key: key.clone(),
                    revision: outcome.revision.clone(),
                });
                Ok(Some(outcome))
            }
            Err(MergeError::IncompletePendingSet { partial, unresolved }) => {
                // Keep the leftovers: a late-arriving parent can unstick
                // them on a later commit.
                if partial.revision != state.revision {
                    self.repo.save(key, &partial.content, &partial.revision).await?;
                    state.content = partial.content.clone();
                    state.revision = partial.revision.clone();
                }
                let unresolved_revs: Vec<Revision> =
                    unresolved.iter().map(|c| c.revision.clone()).collect();
                tracing::warn!(
                    %key,
                    stalled = unresolved.len(),
                    "commit left changes unresolved"
                );
                state.pending = unresolved;
                let _ = self.event_tx.send(LiveEvent::Stalled {
                    key: key.clone(),
                    unresolved: unresolved_revs,
                });
                Ok(Some(partial))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LiveError;
    use crate::repo::MemoryRepository;

    fn seeded(config: LiveConfig) -> (Arc<LiveStore<MemoryRepository>>, BlockKey) {
        // RUST_LOG=scrawl_live=debug to see commit traces in test output.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let repo = MemoryRepository::new();
        let key = BlockKey::new("note", "n-1");
        repo.seed(key.clone(), "", "r0");
        (LiveStore::new(repo, config), key)
    }

    fn slow_config() -> LiveConfig {
        // Debounce far in the future so only explicit flushes commit.
        LiveConfig {
            debounce: Duration::from_secs(3600),
            ..LiveConfig::default()
        }
    }

    #[tokio::test]
    async fn test_append_and_flush_persists_merged_chain() {
        let (store, key) = seeded(slow_config());
        let mut events = store.subscribe();

        store
            .append_change(&key, Change::new("r1", "r0", "amy").insert(0, "Salut"))
            .await
            .unwrap();
        store
            .append_change(&key, Change::new("r2", "r1", "amy").insert(5, " les copains"))
            .await
            .unwrap();

        let outcome = store.flush(&key).await.unwrap().unwrap();
        assert_eq!(outcome.content, "Salut les copains");
        assert_eq!(outcome.revision, "r2");

        let persisted = store.repository().get(&key).unwrap();
        assert_eq!(persisted.content, "Salut les copains");
        assert_eq!(persisted.revision, "r2");

        let working = store.working(&key).await.unwrap();
        assert!(!working.has_pending());
        assert_eq!(store.last_session(&key).unwrap(), "amy");

        assert!(matches!(events.recv().await.unwrap(), LiveEvent::ChangeAppended { .. }));
        assert!(matches!(events.recv().await.unwrap(), LiveEvent::ChangeAppended { .. }));
        match events.recv().await.unwrap() {
            LiveEvent::Committed { revision, .. } => assert_eq!(revision, "r2"),
            other => panic!("expected Committed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_a_burst_into_one_commit() {
        let (store, key) = seeded(LiveConfig {
            debounce: Duration::from_millis(100),
            ..LiveConfig::default()
        });

        store
            .append_change(&key, Change::new("r1", "r0", "amy").insert(0, "a"))
            .await
            .unwrap();
        store
            .append_change(&key, Change::new("r2", "r1", "amy").insert(1, "b"))
            .await
            .unwrap();
        store
            .append_change(&key, Change::new("r3", "r2", "amy").insert(2, "c"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(store.repository().save_count(), 1);
        let persisted = store.repository().get(&key).unwrap();
        assert_eq!(persisted.content, "abc");
        assert_eq!(persisted.revision, "r3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_appends_spaced_past_the_quiet_period_commit_separately() {
        let (store, key) = seeded(LiveConfig {
            debounce: Duration::from_millis(100),
            ..LiveConfig::default()
        });

        store
            .append_change(&key, Change::new("r1", "r0", "amy").insert(0, "a"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        store
            .append_change(&key, Change::new("r2", "r1", "amy").insert(1, "b"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(store.repository().save_count(), 2);
        assert_eq!(store.repository().get(&key).unwrap().content, "ab");
    }

    #[tokio::test]
    async fn test_append_to_missing_block_fails() {
        let (store, _) = seeded(slow_config());
        let missing = BlockKey::new("note", "gone");

        let err = store
            .append_change(&missing, Change::new("r1", "r0", "amy").insert(0, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, LiveError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stalled_changes_are_retained_and_unstuck_later() {
        let (store, key) = seeded(slow_config());
        let mut events = store.subscribe();

        // c2's parent hasn't arrived yet.
        store
            .append_change(&key, Change::new("c2", "c1", "amy").insert(2, "!"))
            .await
            .unwrap();
        let partial = store.flush(&key).await.unwrap().unwrap();
        assert_eq!(partial.revision, "r0");
        // Nothing new was persisted; the orphan stays pending.
        assert_eq!(store.repository().save_count(), 0);
        assert_eq!(store.working(&key).await.unwrap().pending.len(), 1);

        let _ = events.recv().await.unwrap(); // ChangeAppended
        match events.recv().await.unwrap() {
            LiveEvent::Stalled { unresolved, .. } => assert_eq!(unresolved, vec![Revision::from("c2")]),
            other => panic!("expected Stalled, got {other:?}"),
        }

        // The missing parent arrives; the next flush drains both.
        store
            .append_change(&key, Change::new("c1", "r0", "amy").insert(0, "hi"))
            .await
            .unwrap();
        let outcome = store.flush(&key).await.unwrap().unwrap();
        assert_eq!(outcome.content, "hi!");
        assert_eq!(outcome.revision, "c2");
        assert!(!store.working(&key).await.unwrap().has_pending());
    }

    #[tokio::test]
    async fn test_strict_flush_of_stalled_set_returns_partial_not_err() {
        // Strict mode surfaces rebase conflicts, but an unresolvable parent
        // is a stall, not a conflict: the flush still succeeds with the
        // partial outcome and the orphan stays pending.
        let (store, key) = seeded(LiveConfig {
            strict: true,
            ..slow_config()
        });
        let mut events = store.subscribe();

        store
            .append_change(&key, Change::new("c2", "c1", "amy").insert(2, "!"))
            .await
            .unwrap();
        let partial = store.flush(&key).await.unwrap().unwrap();
        assert_eq!(partial.revision, "r0");
        assert_eq!(partial.content, "");
        assert_eq!(store.working(&key).await.unwrap().pending.len(), 1);

        let _ = events.recv().await.unwrap(); // ChangeAppended
        assert!(matches!(events.recv().await.unwrap(), LiveEvent::Stalled { .. }));

        // The parent arrives; the same strict store drains the set.
        store
            .append_change(&key, Change::new("c1", "r0", "amy").insert(0, "hi"))
            .await
            .unwrap();
        let outcome = store.flush(&key).await.unwrap().unwrap();
        assert_eq!(outcome.content, "hi!");
        assert_eq!(outcome.revision, "c2");
    }

    #[tokio::test]
    async fn test_flush_without_pending_is_a_noop() {
        let (store, key) = seeded(slow_config());
        assert!(store.flush(&key).await.unwrap().is_none());

        store
            .append_change(&key, Change::new("r1", "r0", "amy").insert(0, "x"))
            .await
            .unwrap();
        store.flush(&key).await.unwrap();
        // Drained: a second flush has nothing to do.
        assert!(store.flush(&key).await.unwrap().is_none());
        assert_eq!(store.repository().save_count(), 1);
    }

    #[tokio::test]
    async fn test_evict_discards_working_state_and_reseeds_from_repo() {
        let (store, key) = seeded(slow_config());

        store
            .append_change(&key, Change::new("r1", "r0", "amy").insert(0, "x"))
            .await
            .unwrap();
        store.flush(&key).await.unwrap();
        store.evict(&key);
        assert!(store.working(&key).await.is_none());

        // Re-append seeds from the persisted state, not from scratch.
        store
            .append_change(&key, Change::new("r2", "r1", "bob").insert(1, "y"))
            .await
            .unwrap();
        let working = store.working(&key).await.unwrap();
        assert_eq!(working.content, "x");
        assert_eq!(working.revision, "r1");

        let outcome = store.flush(&key).await.unwrap().unwrap();
        assert_eq!(outcome.content, "xy");
    }

    #[tokio::test]
    async fn test_concurrent_appends_from_two_sessions_merge() {
        let (store, key) = seeded(slow_config());

        // Same-parent siblings from two editors.
        store
            .append_change(&key, Change::new("a", "r0", "amy").insert(0, "hello"))
            .await
            .unwrap();
        store
            .append_change(&key, Change::new("b", "r0", "bob").insert(0, " world"))
            .await
            .unwrap();

        let outcome = store.flush(&key).await.unwrap().unwrap();
        assert_eq!(outcome.content, "hello world");
        assert_eq!(outcome.revision, "b");
    }
}
