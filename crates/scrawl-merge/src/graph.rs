//! Dependency graph utilities over a flat pending-change set.
//!
//! These are pure lookups computed on demand from the flat `&[Change]` list;
//! nothing here is cached or mutated. `based_on` links only ever point at
//! temporally earlier revisions, so no cycle guard is needed beyond not
//! revisiting a node already queued.

use std::collections::{BTreeSet, VecDeque};

use crate::change::{Change, Revision};

/// First change carrying the given revision, if present.
pub fn by_revision<'a>(changes: &'a [Change], rev: &str) -> Option<&'a Change> {
    changes.iter().find(|c| c.revision.as_str() == rev)
}

/// All changes that list `parent` among their direct parents, in input order.
pub fn by_parent<'a>(changes: &'a [Change], parent: &str) -> Vec<&'a Change> {
    changes.iter().filter(|c| c.is_based_on(parent)).collect()
}

/// Position of a revision in the flat list, for in-place replacement.
pub(crate) fn position_of(changes: &[Change], rev: &str) -> Option<usize> {
    changes.iter().position(|c| c.revision.as_str() == rev)
}

/// Transitive closure of a change's dependencies, breadth-first.
///
/// Revisions not present in `changes` are already-applied (persisted)
/// ancestors; they stay in the result as leaves but are not expanded.
pub fn all_dependencies(changes: &[Change], change: &Change) -> BTreeSet<Revision> {
    let mut deps: BTreeSet<Revision> = BTreeSet::new();
    let mut queue: VecDeque<Revision> = change.based_on.iter().cloned().collect();

    while let Some(rev) = queue.pop_front() {
        if !deps.insert(rev.clone()) {
            continue;
        }
        if let Some(parent) = by_revision(changes, &rev) {
            for grand in &parent.based_on {
                if !deps.contains(grand) {
                    queue.push_back(grand.clone());
                }
            }
        }
    }

    deps
}
