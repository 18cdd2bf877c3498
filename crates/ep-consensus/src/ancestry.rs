//! # Ancestry Queries
//!
//! Plain graph-reachability helpers over `LinkedEvent`'s parent
//! pointers. Everything the fame election and round-received
//! computation need — "sees", "strongly sees", "earliest self-ancestor
//! that sees" — reduces to a bounded walk of these pointers, since the
//! linker already evicts ancient events and the walk never crosses the
//! non-ancient window.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ep_types::{AddressBook, Hash, LinkedEvent};

/// `true` iff `y` is `x` itself or an ancestor of `x`, walking both
/// parent pointers.
#[must_use]
pub fn is_ancestor(x: &Arc<LinkedEvent>, y: &Arc<LinkedEvent>) -> bool {
    if x.hash() == y.hash() {
        return true;
    }
    let target = y.hash();
    let mut stack = vec![x.clone()];
    let mut visited = HashSet::new();
    while let Some(e) = stack.pop() {
        if !visited.insert(e.hash()) {
            continue;
        }
        if e.hash() == target {
            return true;
        }
        if let Some(p) = &e.self_parent {
            stack.push(p.clone());
        }
        if let Some(p) = &e.other_parent {
            stack.push(p.clone());
        }
    }
    false
}

/// `true` iff `x` sees events created by a supermajority of weighted
/// members, each of which (on some path from `x`) also sees `y`.
///
/// This is the direct definition from the virtual-voting algorithm,
/// evaluated by a plain ancestor walk rather than a maintained bitset:
/// correct, not cheap, and bounded by the same ancient eviction that
/// bounds every other ancestry query here.
#[must_use]
pub fn strongly_sees(x: &Arc<LinkedEvent>, y: &Arc<LinkedEvent>, book: &AddressBook) -> bool {
    if !is_ancestor(x, y) {
        return false;
    }
    let mut creators_seeing_y = HashMap::new();
    let mut stack = vec![x.clone()];
    let mut visited: HashSet<Hash> = HashSet::new();
    while let Some(e) = stack.pop() {
        if !visited.insert(e.hash()) {
            continue;
        }
        if is_ancestor(&e, y) {
            creators_seeing_y.entry(e.creator_id()).or_insert(());
        }
        if let Some(p) = &e.self_parent {
            stack.push(p.clone());
        }
        if let Some(p) = &e.other_parent {
            stack.push(p.clone());
        }
    }
    let weight: u64 = creators_seeing_y.keys().map(|c| book.weight_of(*c)).sum();
    book.is_supermajority(weight)
}

/// Earliest (furthest back) self-ancestor of `witness` (inclusive) that
/// still sees `target`, by `time_created`. `None` if `witness` does not
/// see `target` at all.
#[must_use]
pub fn earliest_self_ancestor_seeing(witness: &Arc<LinkedEvent>, target: &Arc<LinkedEvent>) -> Option<u64> {
    if !is_ancestor(witness, target) {
        return None;
    }
    let mut earliest = witness.event.time_created;
    let mut current = witness.self_parent.clone();
    while let Some(e) = current {
        if is_ancestor(&e, target) {
            earliest = e.event.time_created;
            current = e.self_parent.clone();
        } else {
            break;
        }
    }
    Some(earliest)
}
