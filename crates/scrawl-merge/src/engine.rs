//! Merge engine: linearizes a pending-change set into a single text.
//!
//! [`process`] runs the state machine from §"how edits become text": starting
//! at the last persisted `(content, revision)` pair, it repeatedly picks a
//! ready child of the current revision, folds its primitives into the buffer,
//! and rebases the remaining siblings so their stored positions stay valid.
//!
//! The engine is synchronous and works on an owned copy of the pending set —
//! the caller's [`LiveUpdates`] is never mutated. Exclusion, debounce, and
//! persistence all live with the coordinator.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::change::{Change, LiveUpdates, MicroChange, Revision};
use crate::error::MergeError;
use crate::graph::by_revision;
use crate::rebase::rebase;
use crate::Result;

/// What a successful merge produces: the text and revision to persist.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// Merged text.
    pub content: String,
    /// Revision tag of the last applied change.
    pub revision: Revision,
    /// Number of out-of-range primitives that were clamped or skipped.
    pub anomalies: u32,
}

/// Char-offset text buffer with clamp-don't-panic edit semantics.
///
/// Malformed offsets (stale positions that survived rebase drift) are
/// clamped or skipped and counted, never fatal — the merge policy is
/// best-effort, not validating.
struct TextBuffer {
    chars: Vec<char>,
    anomalies: u32,
}

impl TextBuffer {
    fn new(content: &str) -> Self {
        Self {
            chars: content.chars().collect(),
            anomalies: 0,
        }
    }

    fn len(&self) -> usize {
        self.chars.len()
    }

    fn insert(&mut self, offset: usize, value: &str) {
        if offset >= self.len() {
            if offset > self.len() {
                tracing::warn!(offset, len = self.len(), "insert offset beyond buffer end, appending");
                self.anomalies += 1;
            }
            self.chars.extend(value.chars());
        } else {
            self.chars.splice(offset..offset, value.chars());
        }
    }

    fn delete(&mut self, offset: usize, length: usize) {
        if offset >= self.len() {
            tracing::warn!(offset, len = self.len(), "delete offset beyond buffer end, skipping");
            self.anomalies += 1;
            return;
        }
        let end = (offset + length).min(self.len());
        if end < offset + length {
            tracing::warn!(offset, length, len = self.len(), "delete range beyond buffer end, clamping");
            self.anomalies += 1;
        }
        self.chars.drain(offset..end);
    }

    fn apply(&mut self, change: &Change) {
        // Reverse list order: the last-declared primitive goes first, so
        // earlier-declared offsets stay valid against the original buffer.
        for mu in change.microchanges.iter().rev() {
            match mu {
                MicroChange::Insert { offset, value } => self.insert(*offset, value),
                MicroChange::Delete { offset, length } => self.delete(*offset, *length),
            }
        }
    }

    fn contents(&self) -> String {
        self.chars.iter().collect()
    }
}

/// Merge every pending change into the persisted text.
///
/// Changes are folded in the order their `based_on` chains resolve; when
/// several children of the current revision are ready at once, the first in
/// arrival order wins. After a child is applied, its siblings are rebased
/// onto it and re-enqueued.
///
/// With `strict == false` a failed rebase is logged and the rejected change
/// left to stall (legacy behavior); with `strict == true` the rebase error
/// aborts the merge. A pending set that can never resolve — orphaned
/// parents, stalled rejects — fails with
/// [`MergeError::IncompletePendingSet`] carrying the best-effort partial
/// outcome.
pub fn process(updates: &LiveUpdates, strict: bool) -> Result<MergeOutcome> {
    let mut buffer = TextBuffer::new(&updates.content);
    let mut current = updates.revision.clone();
    let mut applied: BTreeSet<Revision> = BTreeSet::from([current.clone()]);

    // Owned working set; rebase rewrites entries in place. Applied changes
    // stay in it — dependency closures need them.
    let mut working: Vec<Change> = updates.pending.clone();
    let mut remaining: Vec<Revision> = working.iter().map(|c| c.revision.clone()).collect();

    while !remaining.is_empty() {
        let children: Vec<Revision> = remaining
            .iter()
            .filter(|rev| {
                by_revision(&working, rev).is_some_and(|c| c.is_based_on(&current))
            })
            .cloned()
            .collect();

        let ready = children
            .iter()
            .find(|rev| {
                by_revision(&working, rev)
                    .is_some_and(|c| c.based_on.iter().all(|p| applied.contains(p)))
            })
            .cloned();

        let Some(child_rev) = ready else {
            // Orphaned pending set: nothing links back to an applied
            // revision. Terminal stuck state, not a crash — hand back what
            // was merged so far plus the leftovers.
            let unresolved: Vec<Change> = remaining
                .iter()
                .filter_map(|rev| by_revision(&working, rev).cloned())
                .collect();
            tracing::warn!(
                target_class = %updates.target_class,
                target_id = %updates.target_id,
                stalled = unresolved.len(),
                "pending set cannot resolve to an applied revision"
            );
            return Err(MergeError::IncompletePendingSet {
                partial: MergeOutcome {
                    content: buffer.contents(),
                    revision: current,
                    anomalies: buffer.anomalies,
                },
                unresolved,
            });
        };

        let child = by_revision(&working, &child_rev)
            .cloned()
            .ok_or_else(|| MergeError::UnknownRevision(child_rev.clone()))?;
        buffer.apply(&child);

        remaining.retain(|rev| !children.contains(rev));
        for sibling in children.iter().filter(|rev| **rev != child_rev) {
            match rebase(&mut working, &child_rev, sibling) {
                Ok(clean) => {
                    if !clean {
                        tracing::debug!(
                            applied = %child_rev,
                            sibling = %sibling,
                            "overlapping edits resolved heuristically"
                        );
                    }
                }
                Err(err) if strict => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        applied = %child_rev,
                        sibling = %sibling,
                        %err,
                        "rebase failed, leaving change to stall"
                    );
                }
            }
            remaining.push(sibling.clone());
        }

        applied.insert(child_rev.clone());
        current = child_rev;
    }

    Ok(MergeOutcome {
        content: buffer.contents(),
        revision: current,
        anomalies: buffer.anomalies,
    })
}
