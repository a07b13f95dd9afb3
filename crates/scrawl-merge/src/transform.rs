//! Offset transform: the position-shift a change causes, and how it rewrites
//! another change's primitives.
//!
//! [`OffsetMap`] condenses a change into `position -> signed length delta`
//! entries. [`shift`] rewrites a target change so its primitives stay valid
//! after the buffer has absorbed those deltas. All rewriting is copy-on-write:
//! the input change is never mutated, callers get a fresh [`Shifted`] value.
//!
//! The geometric case analysis lives in [`apply_entry`]. Overlapping edits
//! are resolved heuristically — dropped, shrunk, truncated, or clamped
//! primitives mark the shift as not clean, because both changes touched the
//! same characters. Pure position shifts and the insert-point delete split
//! preserve intent and stay clean.

use std::collections::BTreeMap;

use crate::change::{Change, MicroChange};
use crate::error::MergeError;
use crate::Result;

/// Which way a shift moves the target change in history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShiftDirection {
    /// The offsets' change is applied *before* the target.
    Forward,
    /// The offsets' change is pulled out from *under* the target.
    ///
    /// No validated semantics exist for this yet; it always fails with
    /// [`MergeError::UnsupportedShiftDirection`].
    Backward,
}

/// Position deltas caused by one change: char position -> signed length delta.
///
/// Built by walking the change's microchanges in reverse list order (the
/// application order), so every primitive contributes at its own stated
/// offset against the parent-revision buffer. Multiple primitives landing on
/// the same position accumulate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OffsetMap {
    entries: BTreeMap<usize, i64>,
}

impl OffsetMap {
    /// Compute the offset map of a change.
    pub fn of(change: &Change) -> Self {
        let mut entries: BTreeMap<usize, i64> = BTreeMap::new();
        for mu in change.microchanges.iter().rev() {
            *entries.entry(mu.offset()).or_insert(0) += mu.growth();
        }
        entries.retain(|_, delta| *delta != 0);
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(position, delta)` entries in ascending position order.
    ///
    /// Every entry is expressed against the parent-revision buffer, so
    /// consumers that fold a position through the whole map must walk it
    /// `.rev()`: applying the highest entry first leaves the remaining
    /// comparisons in the coordinates the entries were stated in.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (usize, i64)> + '_ {
        self.entries.iter().map(|(&i, &d)| (i, d))
    }

    /// Project this map's positions through another change's primitives.
    ///
    /// Used when propagating offsets to grandchildren: a child's descendants
    /// see positions already displaced by the child itself, so the offsets
    /// must be re-expressed in the child's output coordinates.
    pub fn project_through(&self, child: &Change) -> OffsetMap {
        let through = OffsetMap::of(child);
        let mut entries: BTreeMap<usize, i64> = BTreeMap::new();

        for (index, delta) in self.iter() {
            let mut pos = index;
            for (i, d) in through.iter().rev() {
                if d > 0 {
                    if pos >= i {
                        pos += d as usize;
                    }
                } else {
                    let removed = (-d) as usize;
                    if pos >= i + removed {
                        pos -= removed;
                    } else if pos > i {
                        pos = i;
                    }
                }
            }
            *entries.entry(pos).or_insert(0) += delta;
        }

        entries.retain(|_, delta| *delta != 0);
        OffsetMap { entries }
    }
}

/// Result of shifting a change.
#[derive(Clone, Debug)]
pub struct Shifted {
    /// The rewritten change.
    pub change: Change,
    /// False when the shift had to resolve overlapping edits heuristically.
    pub clean: bool,
}

/// Rewrite `change` so it stays valid after the buffer absorbs `offsets`.
///
/// Copy-on-write: returns a new change, leaving the input untouched. The
/// returned change keeps its revision, parents, and session; only the
/// primitive list is rewritten (primitives may move, shrink, split in two,
/// or vanish entirely).
pub fn shift(change: &Change, offsets: &OffsetMap, direction: ShiftDirection) -> Result<Shifted> {
    if direction == ShiftDirection::Backward {
        return Err(MergeError::UnsupportedShiftDirection);
    }

    let mut clean = true;
    let mut rewritten: Vec<MicroChange> = Vec::with_capacity(change.microchanges.len());

    for mu in &change.microchanges {
        // A primitive can split into two (insert inside a delete) or vanish
        // (delete swallowed whole), so each one is threaded through the
        // offset entries as a small working list.
        let mut prims = vec![mu.clone()];
        // Entries apply highest position first. Lower entries never displace
        // a primitive past a higher one, so each comparison still happens in
        // the parent coordinates the entry was stated in.
        for (index, delta) in offsets.iter().rev() {
            let mut next = Vec::with_capacity(prims.len() + 1);
            for prim in prims {
                apply_entry(prim, index, delta, &mut next, &mut clean);
            }
            prims = next;
        }
        rewritten.extend(prims);
    }

    let mut shifted = change.clone();
    shifted.microchanges = rewritten;
    Ok(Shifted {
        change: shifted,
        clean,
    })
}

/// Apply one `(index, delta)` offset entry to one primitive.
///
/// Survivors are pushed onto `out` in application-safe order; `clean` is
/// lowered when both edits touched the same characters.
fn apply_entry(mu: MicroChange, index: usize, delta: i64, out: &mut Vec<MicroChange>, clean: &mut bool) {
    if delta > 0 {
        apply_insertion(mu, index, delta as usize, out);
    } else if delta < 0 {
        apply_deletion(mu, index, (-delta) as usize, out, clean);
    } else {
        out.push(mu);
    }
}

/// `delta` chars were inserted at `index`.
fn apply_insertion(mu: MicroChange, index: usize, inserted: usize, out: &mut Vec<MicroChange>) {
    match mu {
        MicroChange::Insert { offset, value } => {
            let offset = if offset >= index { offset + inserted } else { offset };
            out.push(MicroChange::Insert { offset, value });
        }
        MicroChange::Delete { offset, length } => {
            let end = offset + length;
            if end <= index {
                // Entirely before the insertion point.
                out.push(MicroChange::Delete { offset, length });
            } else if offset >= index {
                // Entirely after: slide right.
                out.push(MicroChange::Delete {
                    offset: offset + inserted,
                    length,
                });
            } else {
                // Insertion point falls inside the deleted range: split into
                // two deletes straddling the inserted text. Total deleted
                // length is preserved; the inserted text survives.
                let front = index - offset;
                out.push(MicroChange::Delete {
                    offset,
                    length: front,
                });
                out.push(MicroChange::Delete {
                    offset: index + inserted,
                    length: length - front,
                });
            }
        }
    }
}

/// `removed` chars were deleted from `[index, index + removed)`.
fn apply_deletion(
    mu: MicroChange,
    index: usize,
    removed: usize,
    out: &mut Vec<MicroChange>,
    clean: &mut bool,
) {
    let range_end = index + removed;
    match mu {
        MicroChange::Insert { offset, value } => {
            if offset >= range_end {
                // At/after the deleted range: slide left.
                out.push(MicroChange::Insert {
                    offset: offset - removed,
                    value,
                });
            } else if offset > index {
                // Strictly inside: the context the author typed into is
                // gone. Clamp to the start of the collapsed range.
                *clean = false;
                out.push(MicroChange::Insert {
                    offset: index,
                    value,
                });
            } else {
                // At/before the deletion point: untouched.
                out.push(MicroChange::Insert { offset, value });
            }
        }
        MicroChange::Delete { offset, length } => {
            let end = offset + length;
            if end <= index {
                // Entirely before the deleted range.
                out.push(MicroChange::Delete { offset, length });
            } else if offset >= range_end {
                // Entirely after: slide left.
                out.push(MicroChange::Delete {
                    offset: offset - removed,
                    length,
                });
            } else if index <= offset && end <= range_end {
                // Deleted range wraps mu entirely: mu deletes nothing new.
                *clean = false;
            } else if offset <= index && range_end <= end {
                // mu wraps the deleted range: those chars are already gone,
                // shrink mu by the overlap.
                *clean = false;
                out.push(MicroChange::Delete {
                    offset,
                    length: length - removed,
                });
            } else if offset < index {
                // Left-edge overlap: mu's tail was already deleted, keep the
                // front remainder.
                *clean = false;
                out.push(MicroChange::Delete {
                    offset,
                    length: index - offset,
                });
            } else {
                // Right-edge overlap: mu's head was already deleted, keep the
                // tail remainder relocated to the collapse point.
                *clean = false;
                out.push(MicroChange::Delete {
                    offset: index,
                    length: end - range_end,
                });
            }
        }
    }
}
