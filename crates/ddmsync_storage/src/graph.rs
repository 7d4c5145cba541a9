//! The association graph data structure shared by the engines.
//!
//! Set↔declaration and enrollment↔set relations are stored as a
//! forward map plus an inverse index. Every mutation here updates
//! both directions; engines wrap each call in one critical section so
//! the pair is atomic per logical operation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Bidirectional set↔declaration and enrollment↔set relations.
///
/// Ordered maps keep query results deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct AssociationGraph {
    set_declarations: BTreeMap<String, BTreeSet<String>>,
    declaration_sets: BTreeMap<String, BTreeSet<String>>,
    enrollment_sets: BTreeMap<String, BTreeSet<String>>,
    set_enrollments: BTreeMap<String, BTreeSet<String>>,
}

fn link(
    forward: &mut BTreeMap<String, BTreeSet<String>>,
    inverse: &mut BTreeMap<String, BTreeSet<String>>,
    from: &str,
    to: &str,
) -> bool {
    let changed = forward.entry(from.to_string()).or_default().insert(to.to_string());
    inverse.entry(to.to_string()).or_default().insert(from.to_string());
    changed
}

fn unlink(
    forward: &mut BTreeMap<String, BTreeSet<String>>,
    inverse: &mut BTreeMap<String, BTreeSet<String>>,
    from: &str,
    to: &str,
) -> bool {
    let changed = match forward.get_mut(from) {
        Some(members) => {
            let removed = members.remove(to);
            if members.is_empty() {
                // empty memberships are not separately persisted
                forward.remove(from);
            }
            removed
        }
        None => false,
    };
    if let Some(members) = inverse.get_mut(to) {
        members.remove(from);
        if members.is_empty() {
            inverse.remove(to);
        }
    }
    changed
}

fn members(map: &BTreeMap<String, BTreeSet<String>>, key: &str) -> Vec<String> {
    map.get(key).map(|s| s.iter().cloned().collect()).unwrap_or_default()
}

impl AssociationGraph {
    /// Adds a declaration to a set; `true` if the edge was new.
    pub fn link_set_declaration(&mut self, set_name: &str, declaration_id: &str) -> bool {
        link(
            &mut self.set_declarations,
            &mut self.declaration_sets,
            set_name,
            declaration_id,
        )
    }

    /// Removes a declaration from a set; `true` if the edge existed.
    pub fn unlink_set_declaration(&mut self, set_name: &str, declaration_id: &str) -> bool {
        unlink(
            &mut self.set_declarations,
            &mut self.declaration_sets,
            set_name,
            declaration_id,
        )
    }

    /// Subscribes an enrollment to a set; `true` if the edge was new.
    pub fn link_enrollment_set(&mut self, enrollment_id: &str, set_name: &str) -> bool {
        link(
            &mut self.enrollment_sets,
            &mut self.set_enrollments,
            enrollment_id,
            set_name,
        )
    }

    /// Unsubscribes an enrollment from a set; `true` if the edge
    /// existed.
    pub fn unlink_enrollment_set(&mut self, enrollment_id: &str, set_name: &str) -> bool {
        unlink(
            &mut self.enrollment_sets,
            &mut self.set_enrollments,
            enrollment_id,
            set_name,
        )
    }

    /// Unsubscribes an enrollment from all sets; `true` if any edge
    /// existed.
    pub fn unlink_all_enrollment_sets(&mut self, enrollment_id: &str) -> bool {
        let sets = members(&self.enrollment_sets, enrollment_id);
        let mut changed = false;
        for set_name in sets {
            changed |= self.unlink_enrollment_set(enrollment_id, &set_name);
        }
        changed
    }

    /// The sets a declaration is a member of.
    pub fn declaration_sets(&self, declaration_id: &str) -> Vec<String> {
        members(&self.declaration_sets, declaration_id)
    }

    /// The declarations in a set.
    pub fn set_declarations(&self, set_name: &str) -> Vec<String> {
        members(&self.set_declarations, set_name)
    }

    /// The sets an enrollment is subscribed to.
    pub fn enrollment_sets(&self, enrollment_id: &str) -> Vec<String> {
        members(&self.enrollment_sets, enrollment_id)
    }

    /// The enrollments subscribed to a set.
    pub fn set_enrollments(&self, set_name: &str) -> Vec<String> {
        members(&self.set_enrollments, set_name)
    }

    /// All set names with at least one declaration or enrollment.
    pub fn sets(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.set_declarations.keys().cloned().collect();
        names.extend(self.set_enrollments.keys().cloned());
        names.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_are_mirrored() {
        let mut g = AssociationGraph::default();
        assert!(g.link_set_declaration("s1", "d1"));
        assert!(!g.link_set_declaration("s1", "d1"));
        assert_eq!(g.set_declarations("s1"), vec!["d1"]);
        assert_eq!(g.declaration_sets("d1"), vec!["s1"]);

        assert!(g.unlink_set_declaration("s1", "d1"));
        assert!(g.set_declarations("s1").is_empty());
        assert!(g.declaration_sets("d1").is_empty());
    }

    #[test]
    fn removing_missing_edge_is_a_noop() {
        let mut g = AssociationGraph::default();
        assert!(!g.unlink_set_declaration("s1", "d1"));
        assert!(!g.unlink_enrollment_set("e1", "s1"));
        assert!(!g.unlink_all_enrollment_sets("e1"));
    }

    #[test]
    fn empty_sets_disappear() {
        let mut g = AssociationGraph::default();
        g.link_set_declaration("s1", "d1");
        g.link_enrollment_set("e1", "s2");
        assert_eq!(g.sets(), vec!["s1", "s2"]);

        g.unlink_set_declaration("s1", "d1");
        g.unlink_all_enrollment_sets("e1");
        assert!(g.sets().is_empty());
    }

    #[test]
    fn unlink_all_clears_every_subscription() {
        let mut g = AssociationGraph::default();
        g.link_enrollment_set("e1", "s1");
        g.link_enrollment_set("e1", "s2");
        g.link_enrollment_set("e2", "s1");

        assert!(g.unlink_all_enrollment_sets("e1"));
        assert!(g.enrollment_sets("e1").is_empty());
        assert_eq!(g.set_enrollments("s1"), vec!["e2"]);
    }
}
