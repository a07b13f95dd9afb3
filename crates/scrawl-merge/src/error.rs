//! Error types for merge operations.
//!
//! Nothing here fires on ordinary concurrent edits — those are resolved (or
//! soft-logged) by the transform and rebase heuristics. Errors are reserved
//! for structurally invalid pending sets and for conflicts the protocol
//! genuinely cannot reconcile.

use thiserror::Error;

use crate::change::{Change, Revision};
use crate::engine::MergeOutcome;

/// Errors that can occur while transforming, rebasing, or merging changes.
#[derive(Error, Debug)]
pub enum MergeError {
    /// The rebase case analysis has no rule for the two changes' topology.
    ///
    /// Under `strict` processing this aborts the merge; otherwise it is
    /// logged and the rejected change is left to stall.
    #[error("unresolved merge conflict: cannot rebase {rejected} onto {applied}")]
    Conflict {
        /// Revision that was applied to the buffer.
        applied: Revision,
        /// Revision that could not be rebased onto it.
        rejected: Revision,
    },

    /// Some pending changes never resolved to an applied revision.
    ///
    /// Carries the best-effort buffer state reached before the engine got
    /// stuck, plus the still-unresolved changes, so the caller can retry,
    /// alert, or discard.
    #[error("incomplete pending set: {} change(s) left unresolved", .unresolved.len())]
    IncompletePendingSet {
        /// Content and revision reached before the stall.
        partial: MergeOutcome,
        /// Changes whose parents never became available.
        unresolved: Vec<Change>,
    },

    /// A revision referenced by a rebase call is not in the working set.
    #[error("revision not found: {0}")]
    UnknownRevision(Revision),

    /// Backward shifting is declared but has no validated semantics yet.
    ///
    /// Surfaced explicitly rather than silently no-opping; see the
    /// inverted-hierarchy rebase case.
    #[error("backward shift is not supported")]
    UnsupportedShiftDirection,
}
