//! Edit transactions and their atomic primitives.
//!
//! A [`Change`] is one author's edit transaction: a revision id, the parent
//! revision(s) it assumes as already applied, the live session that produced
//! it, and an ordered list of [`MicroChange`] primitives.
//!
//! # Reverse application order
//!
//! Microchanges within a change are applied in **reverse list order** — the
//! last-declared primitive is applied first. Every primitive's offset is
//! expressed against the buffer as it was at the change's parent revision;
//! applying from the tail backwards means earlier-declared primitives never
//! see positions displaced by later-declared ones. This convention is
//! load-bearing: [`crate::transform::OffsetMap`] and the merge engine both
//! assume it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Opaque, caller-assigned revision identifier.
///
/// Names "the text state after applying a specific change". Never interpreted
/// by the engine beyond equality.
pub type Revision = smartstring::alias::String;

/// Identifier for an editor's continuous editing context.
pub type LiveSession = smartstring::alias::String;

/// A single insert or delete primitive.
///
/// Offsets are char offsets (not bytes) into the buffer at the time the
/// owning change's parent revision was current.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MicroChange {
    /// Insert `value` before char position `offset`.
    Insert { offset: usize, value: String },
    /// Delete `length` chars starting at char position `offset`.
    Delete { offset: usize, length: usize },
}

impl MicroChange {
    /// The char position this primitive acts on.
    pub fn offset(&self) -> usize {
        match self {
            MicroChange::Insert { offset, .. } => *offset,
            MicroChange::Delete { offset, .. } => *offset,
        }
    }

    /// Signed length delta this primitive causes when applied.
    ///
    /// Insert lengths are counted in chars, matching buffer offsets.
    pub fn growth(&self) -> i64 {
        match self {
            MicroChange::Insert { value, .. } => value.chars().count() as i64,
            MicroChange::Delete { length, .. } => -(*length as i64),
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, MicroChange::Insert { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, MicroChange::Delete { .. })
    }
}

/// One edit transaction.
///
/// Created by an editor against a known parent revision, then rewritten
/// (copy-on-write, see [`crate::transform::shift`]) as earlier concurrent
/// changes are folded into the buffer ahead of it. `based_on` is conceptually
/// a single parent; the set form tolerates merge bookkeeping where a change
/// temporarily tracks several.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Unique id for the state after this change.
    pub revision: Revision,
    /// Parent revision(s) this change assumes as already applied.
    pub based_on: BTreeSet<Revision>,
    /// Author/session identifier, used to recognize same-author chains.
    pub live_session: LiveSession,
    /// Ordered primitives, applied in reverse list order.
    pub microchanges: Vec<MicroChange>,
}

impl Change {
    /// Create an empty change based on a single parent revision.
    pub fn new(
        revision: impl Into<Revision>,
        parent: impl Into<Revision>,
        live_session: impl Into<LiveSession>,
    ) -> Self {
        Self {
            revision: revision.into(),
            based_on: BTreeSet::from([parent.into()]),
            live_session: live_session.into(),
            microchanges: Vec::new(),
        }
    }

    /// Replace the parent set. Used when constructing multi-parent changes.
    pub fn with_parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Revision>,
    {
        self.based_on = parents.into_iter().map(Into::into).collect();
        self
    }

    /// Append an insert primitive.
    pub fn insert(mut self, offset: usize, value: impl Into<String>) -> Self {
        self.microchanges.push(MicroChange::Insert {
            offset,
            value: value.into(),
        });
        self
    }

    /// Append a delete primitive.
    pub fn delete(mut self, offset: usize, length: usize) -> Self {
        self.microchanges.push(MicroChange::Delete { offset, length });
        self
    }

    /// Whether `rev` is a direct parent of this change.
    pub fn is_based_on(&self, rev: &str) -> bool {
        self.based_on.contains(rev)
    }
}

/// Per-block working state: the last persisted `(content, revision)` pair and
/// the changes accumulated against it since.
///
/// Invariant: every change in `pending` must, transitively through
/// `based_on`, resolve either to `revision` or to another pending change.
/// [`crate::process`] is the only operation that advances
/// `revision`/`content`; the coordinator drains `pending` when it commits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LiveUpdates {
    /// Which persisted entity kind this patches.
    pub target_class: String,
    /// Id of the patched entity.
    pub target_id: String,
    /// Last persisted revision tag.
    pub revision: Revision,
    /// Last persisted text.
    pub content: String,
    /// Changes awaiting merge, in arrival order.
    pub pending: Vec<Change>,
}

impl LiveUpdates {
    /// Seed working state from persisted content.
    pub fn new(
        target_class: impl Into<String>,
        target_id: impl Into<String>,
        content: impl Into<String>,
        revision: impl Into<Revision>,
    ) -> Self {
        Self {
            target_class: target_class.into(),
            target_id: target_id.into(),
            revision: revision.into(),
            content: content.into(),
            pending: Vec::new(),
        }
    }

    /// Append a change to the pending set.
    pub fn append(&mut self, change: Change) {
        self.pending.push(change);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
