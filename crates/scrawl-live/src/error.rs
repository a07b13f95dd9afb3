//! Error types for the live session coordinator.

use thiserror::Error;

use scrawl_merge::MergeError;

use crate::repo::BlockKey;

/// Errors that can occur while coordinating live edits.
#[derive(Error, Debug)]
pub enum LiveError {
    /// The persisted block no longer exists.
    #[error("block not found: {0}")]
    NotFound(BlockKey),

    /// The merge engine rejected the pending set.
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// The repository failed for a reason other than a missing block.
    #[error("repository error: {0}")]
    Repository(String),
}
