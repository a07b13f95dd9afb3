//! Persistence seam for block content.
//!
//! The coordinator only ever needs two operations: load a block's persisted
//! `(content, revision)` pair and save a new one. Anything can sit behind
//! [`BlockRepository`] — a database, a document service, a test double.
//! [`MemoryRepository`] is the in-memory backend used by tests and demos.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use scrawl_merge::Revision;

use crate::error::LiveError;
use crate::Result;

/// Identifies one persisted text block: entity kind plus entity id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockKey {
    /// Which persisted entity kind this patches (e.g. "step", "note").
    pub class: String,
    /// Id of the entity.
    pub id: String,
}

impl BlockKey {
    pub fn new(class: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class, self.id)
    }
}

/// A block's durable state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedBlock {
    pub content: String,
    pub revision: Revision,
}

/// Durable storage for block content and revision tags.
///
/// Implementations must provide read-your-writes consistency per block; the
/// coordinator serializes load/save per block on its side, so no further
/// ordering is required.
#[async_trait]
pub trait BlockRepository: Send + Sync + 'static {
    /// Load a block's persisted content and revision.
    async fn load(&self, key: &BlockKey) -> Result<PersistedBlock>;

    /// Persist new content and revision for an existing block.
    ///
    /// Fails with [`LiveError::NotFound`] if the block was deleted since.
    async fn save(&self, key: &BlockKey, content: &str, revision: &Revision) -> Result<()>;
}

/// In-memory repository backed by a concurrent map.
#[derive(Default)]
pub struct MemoryRepository {
    blocks: DashMap<BlockKey, PersistedBlock>,
    saves: AtomicU64,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a block (or reset an existing one) outside the save path.
    pub fn seed(&self, key: BlockKey, content: impl Into<String>, revision: impl Into<Revision>) {
        self.blocks.insert(
            key,
            PersistedBlock {
                content: content.into(),
                revision: revision.into(),
            },
        );
    }

    /// Read back the persisted state, if any.
    pub fn get(&self, key: &BlockKey) -> Option<PersistedBlock> {
        self.blocks.get(key).map(|b| b.clone())
    }

    /// Number of successful saves. Used by debounce-coalescing tests.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockRepository for MemoryRepository {
    async fn load(&self, key: &BlockKey) -> Result<PersistedBlock> {
        self.blocks
            .get(key)
            .map(|b| b.clone())
            .ok_or_else(|| LiveError::NotFound(key.clone()))
    }

    async fn save(&self, key: &BlockKey, content: &str, revision: &Revision) -> Result<()> {
        let mut block = self
            .blocks
            .get_mut(key)
            .ok_or_else(|| LiveError::NotFound(key.clone()))?;
        block.content = content.to_string();
        block.revision = revision.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_repository_load_save_roundtrip() {
        let repo = MemoryRepository::new();
        let key = BlockKey::new("note", "n-1");
        repo.seed(key.clone(), "hello", "r0");

        let block = repo.load(&key).await.unwrap();
        assert_eq!(block.content, "hello");
        assert_eq!(block.revision, "r0");

        repo.save(&key, "hello world", &Revision::from("r1")).await.unwrap();
        assert_eq!(repo.load(&key).await.unwrap().revision, "r1");
        assert_eq!(repo.save_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_repository_missing_block() {
        let repo = MemoryRepository::new();
        let key = BlockKey::new("note", "gone");

        assert!(matches!(repo.load(&key).await, Err(LiveError::NotFound(_))));
        assert!(matches!(
            repo.save(&key, "x", &Revision::from("r1")).await,
            Err(LiveError::NotFound(_))
        ));
    }
}
