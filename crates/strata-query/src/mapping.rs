//! The bidirectional group/node mapping and its change-set diff.
//!
//! Built fresh from the query layer each run and persisted only as a
//! snapshot inside the dump tracker, where it is diffed against the next
//! run's freshly built mapping.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueryResult;
use crate::traits::QuerySource;

/// Two synchronized dictionaries: group to members and node to groups.
///
/// Invariant: the directions are always consistent. A node's presence in
/// a group's set implies the group's presence in that node's set, and
/// vice versa; [`insert`](GroupNodeMapping::insert) is the only way to
/// grow the mapping, which keeps both sides in lockstep.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupNodeMapping {
    pub group_to_nodes: BTreeMap<Uuid, BTreeSet<Uuid>>,
    pub node_to_groups: BTreeMap<Uuid, BTreeSet<Uuid>>,
}

impl GroupNodeMapping {
    /// An empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the mapping from the query layer, optionally scoped to a
    /// subset of groups.
    pub fn build(query: &dyn QuerySource, scope: Option<&[Uuid]>) -> QueryResult<Self> {
        let mut mapping = Self::new();
        for (group, node) in query.memberships(scope)? {
            mapping.insert(group, node);
        }
        // Scoped or not, every queried group appears, even when empty.
        match scope {
            Some(groups) => {
                for group in groups {
                    mapping.group_to_nodes.entry(*group).or_default();
                }
            }
            None => {
                for group in query.groups()? {
                    mapping.group_to_nodes.entry(group.uuid).or_default();
                }
            }
        }
        Ok(mapping)
    }

    /// Record one membership, updating both directions.
    pub fn insert(&mut self, group: Uuid, node: Uuid) {
        self.group_to_nodes.entry(group).or_default().insert(node);
        self.node_to_groups.entry(node).or_default().insert(group);
    }

    /// The members of `group`, empty if unknown.
    pub fn nodes_of(&self, group: &Uuid) -> BTreeSet<Uuid> {
        self.group_to_nodes.get(group).cloned().unwrap_or_default()
    }

    /// The groups containing `node`, empty if ungrouped.
    pub fn groups_of(&self, node: &Uuid) -> BTreeSet<Uuid> {
        self.node_to_groups.get(node).cloned().unwrap_or_default()
    }

    /// Returns `true` if `node` belongs to at least one group.
    pub fn is_grouped(&self, node: &Uuid) -> bool {
        self.node_to_groups
            .get(node)
            .is_some_and(|groups| !groups.is_empty())
    }

    /// All group UUIDs in the mapping.
    pub fn group_uuids(&self) -> BTreeSet<Uuid> {
        self.group_to_nodes.keys().copied().collect()
    }

    /// Consistency check across the two directions. Test and debug aid.
    pub fn is_consistent(&self) -> bool {
        let forward_ok = self.group_to_nodes.iter().all(|(group, nodes)| {
            nodes.iter().all(|node| {
                self.node_to_groups
                    .get(node)
                    .is_some_and(|groups| groups.contains(group))
            })
        });
        let backward_ok = self.node_to_groups.iter().all(|(node, groups)| {
            groups.iter().all(|group| {
                self.group_to_nodes
                    .get(group)
                    .is_some_and(|nodes| nodes.contains(node))
            })
        });
        forward_ok && backward_ok
    }

    /// A copy containing only the given groups. Used to diff a scoped run
    /// against the matching slice of the previous snapshot.
    pub fn restricted_to(&self, groups: &BTreeSet<Uuid>) -> Self {
        let mut restricted = Self::new();
        for (group, nodes) in &self.group_to_nodes {
            if !groups.contains(group) {
                continue;
            }
            restricted.group_to_nodes.insert(*group, nodes.clone());
            for node in nodes {
                restricted
                    .node_to_groups
                    .entry(*node)
                    .or_default()
                    .insert(*group);
            }
        }
        restricted
    }

    /// Replace one group's member set, updating both directions.
    pub fn set_group(&mut self, group: Uuid, nodes: BTreeSet<Uuid>) {
        self.remove_group(&group);
        self.group_to_nodes.insert(group, nodes.clone());
        for node in nodes {
            self.node_to_groups.entry(node).or_default().insert(group);
        }
    }

    /// Drop a group from both directions.
    pub fn remove_group(&mut self, group: &Uuid) {
        if let Some(nodes) = self.group_to_nodes.remove(group) {
            for node in nodes {
                if let Some(groups) = self.node_to_groups.get_mut(&node) {
                    groups.remove(group);
                    if groups.is_empty() {
                        self.node_to_groups.remove(&node);
                    }
                }
            }
        }
    }

    /// Diff two mappings into a structured change set.
    ///
    /// Set difference on the group UUID sets yields `deleted` and `new`;
    /// for groups in the intersection, per-group member set differences
    /// yield `modified`, and every member delta is mirrored into the
    /// node-centric `node_membership` map. Rename detection is a separate
    /// pass owned by the change detector, not by this function.
    pub fn diff(old: &Self, new: &Self) -> GroupChanges {
        let old_groups = old.group_uuids();
        let new_groups = new.group_uuids();

        let mut changes = GroupChanges {
            deleted: old_groups.difference(&new_groups).copied().collect(),
            new: new_groups.difference(&old_groups).copied().collect(),
            ..Default::default()
        };

        for group in old_groups.intersection(&new_groups) {
            let old_members = old.nodes_of(group);
            let new_members = new.nodes_of(group);
            let added: BTreeSet<Uuid> =
                new_members.difference(&old_members).copied().collect();
            let removed: BTreeSet<Uuid> =
                old_members.difference(&new_members).copied().collect();
            if added.is_empty() && removed.is_empty() {
                continue;
            }
            for node in &added {
                changes
                    .node_membership
                    .entry(*node)
                    .or_default()
                    .added_to
                    .insert(*group);
            }
            for node in &removed {
                changes
                    .node_membership
                    .entry(*node)
                    .or_default()
                    .removed_from
                    .insert(*group);
            }
            changes.modified.push(GroupModification {
                uuid: *group,
                added,
                removed,
            });
        }

        changes
    }
}

/// Structured result of diffing two mappings.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupChanges {
    /// Groups present before, gone now. Only the UUID survives deletion.
    pub deleted: Vec<Uuid>,
    /// Groups that did not exist before.
    pub new: Vec<Uuid>,
    /// Groups present in both with a changed member set.
    pub modified: Vec<GroupModification>,
    /// The same member deltas keyed by node: one record per node, however
    /// many groups it moved in or out of this run.
    pub node_membership: BTreeMap<Uuid, NodeMembershipChange>,
}

impl GroupChanges {
    /// Returns `true` if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
            && self.new.is_empty()
            && self.modified.is_empty()
            && self.node_membership.is_empty()
    }
}

/// Member delta for one surviving group.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupModification {
    pub uuid: Uuid,
    pub added: BTreeSet<Uuid>,
    pub removed: BTreeSet<Uuid>,
}

/// Membership delta for one node across all groups in a run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeMembershipChange {
    pub added_to: BTreeSet<Uuid>,
    pub removed_from: BTreeSet<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn insert_keeps_directions_consistent() {
        let mut mapping = GroupNodeMapping::new();
        mapping.insert(uuid(1), uuid(10));
        mapping.insert(uuid(1), uuid(11));
        mapping.insert(uuid(2), uuid(10));

        assert!(mapping.is_consistent());
        assert_eq!(mapping.nodes_of(&uuid(1)).len(), 2);
        assert_eq!(mapping.groups_of(&uuid(10)).len(), 2);
        assert!(mapping.is_grouped(&uuid(10)));
        assert!(!mapping.is_grouped(&uuid(99)));
    }

    #[test]
    fn diff_detects_new_and_deleted_groups() {
        let mut old = GroupNodeMapping::new();
        old.insert(uuid(1), uuid(10));
        let mut new = GroupNodeMapping::new();
        new.insert(uuid(2), uuid(10));

        let changes = GroupNodeMapping::diff(&old, &new);
        assert_eq!(changes.deleted, vec![uuid(1)]);
        assert_eq!(changes.new, vec![uuid(2)]);
        assert!(changes.modified.is_empty());
    }

    #[test]
    fn diff_detects_membership_changes() {
        let mut old = GroupNodeMapping::new();
        old.insert(uuid(1), uuid(10));
        old.insert(uuid(1), uuid(11));
        let mut new = GroupNodeMapping::new();
        new.insert(uuid(1), uuid(11));
        new.insert(uuid(1), uuid(12));

        let changes = GroupNodeMapping::diff(&old, &new);
        assert_eq!(changes.modified.len(), 1);
        let modification = &changes.modified[0];
        assert_eq!(modification.uuid, uuid(1));
        assert!(modification.added.contains(&uuid(12)));
        assert!(modification.removed.contains(&uuid(10)));

        assert!(changes.node_membership[&uuid(12)].added_to.contains(&uuid(1)));
        assert!(changes.node_membership[&uuid(10)]
            .removed_from
            .contains(&uuid(1)));
    }

    #[test]
    fn node_added_to_two_groups_has_one_record() {
        let mut old = GroupNodeMapping::new();
        old.group_to_nodes.entry(uuid(1)).or_default();
        old.group_to_nodes.entry(uuid(2)).or_default();
        let mut new = GroupNodeMapping::new();
        new.insert(uuid(1), uuid(10));
        new.insert(uuid(2), uuid(10));

        let changes = GroupNodeMapping::diff(&old, &new);
        assert_eq!(changes.node_membership.len(), 1);
        let membership = &changes.node_membership[&uuid(10)];
        assert_eq!(membership.added_to.len(), 2);
    }

    #[test]
    fn unchanged_groups_are_not_reported() {
        let mut old = GroupNodeMapping::new();
        old.insert(uuid(1), uuid(10));
        let new = old.clone();
        assert!(GroupNodeMapping::diff(&old, &new).is_empty());
    }

    #[test]
    fn restricted_to_drops_other_groups() {
        let mut mapping = GroupNodeMapping::new();
        mapping.insert(uuid(1), uuid(10));
        mapping.insert(uuid(2), uuid(10));
        mapping.insert(uuid(2), uuid(11));

        let scope: BTreeSet<Uuid> = [uuid(2)].into();
        let restricted = mapping.restricted_to(&scope);
        assert_eq!(restricted.group_uuids(), scope);
        assert_eq!(restricted.groups_of(&uuid(10)).len(), 1);
        assert!(restricted.is_consistent());
    }

    #[test]
    fn set_group_replaces_members_in_both_directions() {
        let mut mapping = GroupNodeMapping::new();
        mapping.insert(uuid(1), uuid(10));
        mapping.set_group(uuid(1), [uuid(11)].into());
        assert!(!mapping.is_grouped(&uuid(10)));
        assert!(mapping.nodes_of(&uuid(1)).contains(&uuid(11)));
        assert!(mapping.is_consistent());
    }

    #[test]
    fn remove_group_prunes_reverse_entries() {
        let mut mapping = GroupNodeMapping::new();
        mapping.insert(uuid(1), uuid(10));
        mapping.insert(uuid(2), uuid(10));
        mapping.remove_group(&uuid(1));
        assert_eq!(mapping.groups_of(&uuid(10)), [uuid(2)].into());
        assert!(mapping.is_consistent());
    }

    #[test]
    fn serde_roundtrip() {
        let mut mapping = GroupNodeMapping::new();
        mapping.insert(uuid(1), uuid(10));
        let json = serde_json::to_string(&mapping).unwrap();
        let parsed: GroupNodeMapping = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, mapping);
    }
}
