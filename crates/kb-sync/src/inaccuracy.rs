// Copyright 2026 The kb-sync Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Inaccuracy propagation: when a record's content changes, its dependents
//! (reached by walking incoming link edges) get their own `inaccuracy` score
//! bumped, decaying with hop distance and weighted by link type. Invoked
//! both by local update tools and by pull after a content change.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::record::{LinkType, Status, INACCURACY_CAP};
use crate::store::Tx;

/// Halves the bump at every additional hop from the changed record.
pub const HOP_DECAY: f64 = 0.5;

/// Below this, a prospective bump is neither applied nor propagated further.
pub const FLOOR: f64 = 1e-3;

/// The normalized size of a content change, derived from a diff ratio over
/// `old` and `new`. `0.0` iff the two strings are identical; otherwise
/// clamped to `[0.1, 1.0]` so even a tiny edit counts as a real change.
pub fn diff_factor(old: &str, new: &str) -> f64 {
    if old == new {
        return 0.0;
    }
    let ratio = similar::TextDiff::from_words(old, new).ratio() as f64;
    (1.0 - ratio).clamp(0.1, 1.0)
}

/// Walks the link graph against incoming edges from `changed` (i.e. records
/// that depend on it), bumping each dependent's `inaccuracy`. A no-op if
/// `diff_factor` is `0.0`.
///
/// Processes one hop depth at a time: every link reachable at the current
/// depth contributes to its source's total bump before any record at that
/// depth is committed, so a record reached by two paths at the same depth
/// accumulates both contributions in one write. Once a record has been
/// bumped it is not revisited by a later, more dilute path.
pub fn propagate(tx: &mut dyn Tx, changed: Uuid, diff_factor: f64) -> anyhow::Result<()> {
    if diff_factor <= 0.0 {
        return Ok(());
    }

    let mut visited: HashSet<Uuid> = HashSet::from([changed]);
    let mut frontier = vec![changed];
    let mut depth: i32 = 0;

    while !frontier.is_empty() {
        depth += 1;
        let decay = HOP_DECAY.powi(depth);

        let mut contributions: HashMap<Uuid, f64> = HashMap::new();
        for node in &frontier {
            for link in tx.incoming(*node, None)? {
                if matches!(link.link_type, LinkType::ConflictsWith) || link.is_conflict_provenance() {
                    continue;
                }
                let weight = link.link_type.propagation_weight();
                if weight <= 0.0 {
                    continue;
                }
                *contributions.entry(link.source_id).or_insert(0.0) += diff_factor * decay * weight;
            }
        }

        let mut next_frontier = Vec::new();
        for (id, bump) in contributions {
            if visited.contains(&id) {
                continue;
            }
            let Some(entry) = tx.get_entry(id)? else {
                continue;
            };
            if matches!(entry.status, Status::Deprecated | Status::Dormant) {
                continue;
            }
            if bump < FLOOR {
                continue;
            }
            let updated = (entry.inaccuracy + bump).min(INACCURACY_CAP);
            tx.set_inaccuracy(id, updated)?;
            visited.insert(id);
            next_frontier.push(id);
        }
        frontier = next_frontier;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use kb_testutils::fixtures;
    use kb_testutils::memory_store::MemoryStore;

    #[test]
    fn no_change_is_a_noop() {
        assert_eq!(diff_factor("same", "same"), 0.0);
    }

    #[test]
    fn any_real_change_is_floored_at_point_one() {
        let d = diff_factor("a", "a very slightly different sentence");
        assert!((0.1..=1.0).contains(&d));
    }

    #[test]
    fn direct_dependent_gets_full_first_hop_bump() {
        let root = fixtures::entry("Root");
        let dependent = fixtures::entry("Dependent");
        let link = fixtures::link(dependent.id, root.id, LinkType::Derived);
        let store = MemoryStore::seed(vec![root.clone(), dependent.clone()], vec![link]);

        store
            .transaction(|tx| {
                propagate(tx, root.id, 1.0)?;
                let updated = tx.get_entry(dependent.id)?.unwrap();
                assert!((updated.inaccuracy - 0.5).abs() < 1e-9);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn conflicts_with_edges_never_propagate() {
        let root = fixtures::entry("Root");
        let dependent = fixtures::entry("Dependent");
        let link = fixtures::link(dependent.id, root.id, LinkType::ConflictsWith);
        let store = MemoryStore::seed(vec![root.clone(), dependent.clone()], vec![link]);

        store
            .transaction(|tx| {
                propagate(tx, root.id, 1.0)?;
                let updated = tx.get_entry(dependent.id)?.unwrap();
                assert_eq!(updated.inaccuracy, 0.0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn deprecated_dependents_are_skipped_and_not_traversed_through() {
        let root = fixtures::entry("Root");
        let mut middle = fixtures::entry("Middle");
        middle.status = Status::Deprecated;
        let leaf = fixtures::entry("Leaf");
        let l1 = fixtures::link(middle.id, root.id, LinkType::Derived);
        let l2 = fixtures::link(leaf.id, middle.id, LinkType::Derived);
        let store = MemoryStore::seed(vec![root.clone(), middle.clone(), leaf.clone()], vec![l1, l2]);

        store
            .transaction(|tx| {
                propagate(tx, root.id, 1.0)?;
                assert_eq!(tx.get_entry(middle.id)?.unwrap().inaccuracy, 0.0);
                assert_eq!(tx.get_entry(leaf.id)?.unwrap().inaccuracy, 0.0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn cycles_terminate() {
        let a = fixtures::entry("A");
        let b = fixtures::entry("B");
        let l1 = fixtures::link(a.id, b.id, LinkType::Derived);
        let l2 = fixtures::link(b.id, a.id, LinkType::Derived);
        let store = MemoryStore::seed(vec![a.clone(), b.clone()], vec![l1, l2]);

        store
            .transaction(|tx| {
                propagate(tx, a.id, 1.0)?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn accumulates_contributions_from_multiple_same_depth_paths() {
        let root = fixtures::entry("Root");
        let mid_a = fixtures::entry("MidA");
        let mid_b = fixtures::entry("MidB");
        let leaf = fixtures::entry("Leaf");
        let links = vec![
            fixtures::link(mid_a.id, root.id, LinkType::Derived),
            fixtures::link(mid_b.id, root.id, LinkType::Derived),
            fixtures::link(leaf.id, mid_a.id, LinkType::Derived),
            fixtures::link(leaf.id, mid_b.id, LinkType::Derived),
        ];
        let store = MemoryStore::seed(vec![root.clone(), mid_a.clone(), mid_b.clone(), leaf.clone()], links);

        store
            .transaction(|tx| {
                propagate(tx, root.id, 1.0)?;
                let leaf_after = tx.get_entry(leaf.id)?.unwrap();
                // Two second-hop paths each contribute 1.0 * 0.5^2 * 1.0 = 0.25.
                assert!((leaf_after.inaccuracy - 0.5).abs() < 1e-9);
                Ok(())
            })
            .unwrap();
    }
}
