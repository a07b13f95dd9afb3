//! Live session coordination for scrawl blocks.
//!
//! The merge engine (`scrawl-merge`) is pure and synchronous; this crate is
//! the boundary around it. A [`LiveStore`] keeps one working set per block in
//! a shared cache, serializes appends and commits behind a per-block async
//! mutex, coalesces keystroke bursts with a debounced commit, and persists
//! results through the [`BlockRepository`] seam.
//!
//! ```no_run
//! use std::sync::Arc;
//! use scrawl_live::{BlockKey, LiveConfig, LiveStore, MemoryRepository};
//! use scrawl_merge::Change;
//!
//! # async fn demo() -> scrawl_live::Result<()> {
//! let repo = MemoryRepository::new();
//! let key = BlockKey::new("note", "n-1");
//! repo.seed(key.clone(), "", "r0");
//!
//! let store = LiveStore::new(repo, LiveConfig::default());
//! store.append_change(&key, Change::new("r1", "r0", "amy").insert(0, "hi")).await?;
//! // ...the debounced commit persists "hi" after the quiet period.
//! # Ok(())
//! # }
//! ```
//!
//! Transport, auth, and distributed locking live above this crate; it only
//! guarantees merge correctness given exclusive access to one block's state,
//! which it enforces in-process. A multi-node deployment needs an external
//! mutual-exclusion layer in front.

mod error;
mod repo;
mod store;

pub use error::LiveError;
pub use repo::{BlockKey, BlockRepository, MemoryRepository, PersistedBlock};
pub use store::{LiveConfig, LiveEvent, LiveStore};

// The model types callers hand us come from the engine crate.
pub use scrawl_merge::{Change, LiveUpdates, MergeOutcome, MicroChange, Revision};

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, LiveError>;
