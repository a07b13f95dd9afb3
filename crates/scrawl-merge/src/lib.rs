//! Live microchange merge engine for concurrent plain-text editing.
//!
//! Several editors apply small edits ("microchanges") to the same shared text
//! block. This crate owns the data model for pending edits, the dependency
//! graph between them, and the merge that (a) linearizes concurrent edits
//! into one consistent text and (b) rebases not-yet-applied edits so their
//! stored positions stay valid after earlier edits are folded in.
//!
//! # Shape
//!
//! - [`Change`] / [`MicroChange`]: one edit transaction and its insert/delete
//!   primitives. Primitives apply in reverse list order; see [`Change`].
//! - [`by_revision`] / [`by_parent`] / [`all_dependencies`]: pure lookups
//!   over the flat pending set.
//! - [`OffsetMap`] / [`shift`]: the position-shift a change causes, and how
//!   it rewrites another change's primitives (split/shrink/drop on overlap).
//! - [`rebase`]: the sibling / inverted / already-reconciled case analysis.
//! - [`process`]: the merge loop producing a [`MergeOutcome`].
//!
//! # What this crate is not
//!
//! Not a CRDT: the merge policy is a best-effort heuristic with no
//! convergence proof. Overlapping edits are resolved by a fixed geometric
//! case table and flagged, not negotiated. Persistence, transport, locking,
//! and debounce all belong to the coordinator (`scrawl-live`).
//!
//! Everything here is synchronous and side-effect free: callers hand in a
//! [`LiveUpdates`] snapshot and get values back.

mod change;
mod engine;
mod error;
mod graph;
mod rebase;
mod transform;

pub use change::{Change, LiveSession, LiveUpdates, MicroChange, Revision};
pub use engine::{process, MergeOutcome};
pub use error::MergeError;
pub use graph::{all_dependencies, by_parent, by_revision};
pub use rebase::{propagate_offsets, rebase};
pub use transform::{shift, OffsetMap, Shifted, ShiftDirection};

/// Result type for merge operations.
pub type Result<T> = std::result::Result<T, MergeError>;
