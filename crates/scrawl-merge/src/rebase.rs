//! Rebase protocol: deciding how two changes relate and rewriting the later
//! one (and its descendants) to follow the earlier.
//!
//! Three handled topologies, checked in priority order:
//!
//! 1. **Siblings** — identical dependency closures: shift the target by the
//!    new base's offsets, propagate down the target's descendants, reparent.
//! 2. **Inverted hierarchy** — the new base claims the target as its only
//!    parent: the intended order was backwards, swap them. Requires a
//!    backward shift, so this currently fails with
//!    [`MergeError::UnsupportedShiftDirection`].
//! 3. **Already reconciled** — the target's closure subsumes the new base's:
//!    nothing to do.
//!
//! Anything else is an unhandled topology and fails with
//! [`MergeError::Conflict`]; the caller decides whether that aborts the merge
//! or only stalls the rejected change.
//!
//! All rewriting is copy-on-write into the owned working set: on any error
//! path the set is left exactly as it was.

use std::collections::BTreeSet;

use crate::change::{Change, Revision};
use crate::error::MergeError;
use crate::graph::{all_dependencies, by_parent, by_revision, position_of};
use crate::transform::{shift, OffsetMap, ShiftDirection};
use crate::Result;

/// Rebase the change `target` onto `new_base` within the working set.
///
/// Returns `Ok(clean)`; `clean == false` means overlapping edits were
/// resolved heuristically somewhere along the way.
pub fn rebase(changes: &mut Vec<Change>, new_base: &str, target: &str) -> Result<bool> {
    let nb = by_revision(changes, new_base)
        .cloned()
        .ok_or_else(|| MergeError::UnknownRevision(Revision::from(new_base)))?;
    let tg = by_revision(changes, target)
        .cloned()
        .ok_or_else(|| MergeError::UnknownRevision(Revision::from(target)))?;

    let nb_deps = all_dependencies(changes, &nb);
    let tg_deps = all_dependencies(changes, &tg);

    // Case 1: siblings — same dependency closure.
    if nb_deps == tg_deps {
        let offsets = OffsetMap::of(&nb);
        let shifted = shift(&tg, &offsets, ShiftDirection::Forward)?;
        // Descendants are walked before the reparent below so that the
        // "already dependent on new_base via another path" check still sees
        // the target's old parents.
        let propagated = propagate_offsets(changes, target, &offsets, ShiftDirection::Forward, new_base)?;

        let mut committed = shifted.change;
        committed.based_on = BTreeSet::from([nb.revision.clone()]);
        let idx = position_of(changes, target)
            .ok_or_else(|| MergeError::UnknownRevision(Revision::from(target)))?;
        changes[idx] = committed;
        return Ok(shifted.clean && propagated);
    }

    // Case 2: inverted hierarchy — new_base claims target as its only parent.
    if nb.based_on.len() == 1 && nb.is_based_on(target) {
        // Pulling target out from under new_base needs a backward shift,
        // which has no validated semantics yet; the shift call fails before
        // anything is committed.
        let back = shift(&nb, &OffsetMap::of(&tg), ShiftDirection::Backward)?;
        let mut new_nb = back.change;
        new_nb.based_on = tg.based_on.clone();

        let fwd = shift(&tg, &OffsetMap::of(&new_nb), ShiftDirection::Forward)?;
        let mut new_tg = fwd.change;
        new_tg.based_on = BTreeSet::from([nb.revision.clone()]);

        let nb_idx = position_of(changes, new_base)
            .ok_or_else(|| MergeError::UnknownRevision(Revision::from(new_base)))?;
        let tg_idx = position_of(changes, target)
            .ok_or_else(|| MergeError::UnknownRevision(Revision::from(target)))?;
        changes[nb_idx] = new_nb;
        changes[tg_idx] = new_tg;
        return Ok(back.clean && fwd.clean);
    }

    // Case 3: already reconciled — target already depends on everything the
    // new base does.
    if tg_deps.is_superset(&nb_deps) {
        return Ok(true);
    }

    // Case 4: no rule for this topology (genuine multi-parent merges land
    // here — see DESIGN.md).
    tracing::warn!(
        applied = %nb.revision,
        rejected = %tg.revision,
        session = %tg.live_session,
        "no rebase rule for change topology"
    );
    Err(MergeError::Conflict {
        applied: nb.revision,
        rejected: tg.revision,
    })
}

/// Push `offsets` down through every descendant of `parent`.
///
/// A child already transitively dependent on `origin` has seen these offsets
/// along another path; instead of shifting it twice, its direct dependency on
/// `origin` is dropped (merge bookkeeping for converging branches). Everyone
/// else is shifted, and the offsets — re-projected through the shifted child's
/// own primitives — recurse into the grandchildren.
pub fn propagate_offsets(
    changes: &mut Vec<Change>,
    parent: &str,
    offsets: &OffsetMap,
    direction: ShiftDirection,
    origin: &str,
) -> Result<bool> {
    let child_revs: Vec<Revision> = by_parent(changes, parent)
        .iter()
        .map(|c| c.revision.clone())
        .collect();

    let mut clean = true;
    for child_rev in child_revs {
        let Some(child) = by_revision(changes, &child_rev).cloned() else {
            continue;
        };

        if all_dependencies(changes, &child).contains(origin) {
            if let Some(idx) = position_of(changes, &child_rev) {
                changes[idx].based_on.remove(origin);
            }
            continue;
        }

        let shifted = shift(&child, offsets, direction)?;
        clean &= shifted.clean;
        let projected = offsets.project_through(&shifted.change);
        if let Some(idx) = position_of(changes, &child_rev) {
            changes[idx] = shifted.change;
        }
        clean &= propagate_offsets(changes, &child_rev, &projected, direction, origin)?;
    }

    Ok(clean)
}
