//! In-memory query source for tests, demos, and the CLI.
//!
//! A [`Profile`] is a serde-loadable snapshot of an entity store:
//! entities, groups, memberships, and directed data links. The
//! [`MemoryQuerySource`] serves it behind the [`QuerySource`] trait and
//! offers mutation helpers so tests can simulate store evolution between
//! dump runs.

use std::collections::BTreeSet;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_types::{EntityInfo, EntityKind, GroupInfo};
use uuid::Uuid;

use crate::error::{QueryError, QueryResult};
use crate::traits::{EntityFilter, QuerySource};

/// One group membership edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub group: Uuid,
    pub node: Uuid,
}

/// One directed data link: `source` produces, `target` consumes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataLink {
    pub source: Uuid,
    pub target: Uuid,
    pub label: String,
}

/// Serde-loadable snapshot of an entity store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub entities: Vec<EntityInfo>,
    #[serde(default)]
    pub groups: Vec<GroupInfo>,
    #[serde(default)]
    pub memberships: Vec<Membership>,
    #[serde(default)]
    pub links: Vec<DataLink>,
}

impl Profile {
    /// Decode a profile from a JSON document.
    pub fn from_json(json: &str) -> QueryResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| QueryError::MalformedProfile(e.to_string()))
    }
}

/// [`QuerySource`] over an in-memory [`Profile`].
pub struct MemoryQuerySource {
    profile: RwLock<Profile>,
}

impl MemoryQuerySource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::from_profile(Profile::default())
    }

    /// Serve the given profile.
    pub fn from_profile(profile: Profile) -> Self {
        Self {
            profile: RwLock::new(profile),
        }
    }

    // ---------------------------------------------------------------
    // Mutation helpers for simulating store evolution
    // ---------------------------------------------------------------

    /// Add an entity.
    pub fn add_entity(&self, entity: EntityInfo) {
        self.profile
            .write()
            .expect("lock poisoned")
            .entities
            .push(entity);
    }

    /// Add a group.
    pub fn add_group(&self, group: GroupInfo) {
        self.profile
            .write()
            .expect("lock poisoned")
            .groups
            .push(group);
    }

    /// Add a membership edge.
    pub fn add_membership(&self, group: Uuid, node: Uuid) {
        self.profile
            .write()
            .expect("lock poisoned")
            .memberships
            .push(Membership { group, node });
    }

    /// Remove a membership edge.
    pub fn remove_membership(&self, group: Uuid, node: Uuid) {
        self.profile
            .write()
            .expect("lock poisoned")
            .memberships
            .retain(|m| !(m.group == group && m.node == node));
    }

    /// Add a directed data link.
    pub fn add_link(&self, source: Uuid, target: Uuid, label: impl Into<String>) {
        self.profile.write().expect("lock poisoned").links.push(DataLink {
            source,
            target,
            label: label.into(),
        });
    }

    /// Remove an entity together with its memberships and links.
    pub fn remove_entity(&self, uuid: Uuid) {
        let mut profile = self.profile.write().expect("lock poisoned");
        profile.entities.retain(|e| e.uuid != uuid);
        profile.memberships.retain(|m| m.node != uuid);
        profile
            .links
            .retain(|l| l.source != uuid && l.target != uuid);
    }

    /// Remove a group together with its memberships.
    pub fn remove_group(&self, uuid: Uuid) {
        let mut profile = self.profile.write().expect("lock poisoned");
        profile.groups.retain(|g| g.uuid != uuid);
        profile.memberships.retain(|m| m.group != uuid);
    }

    /// Rename a group and bump its modification time.
    pub fn relabel_group(&self, uuid: Uuid, label: impl Into<String>, mtime: DateTime<Utc>) {
        let mut profile = self.profile.write().expect("lock poisoned");
        if let Some(group) = profile.groups.iter_mut().find(|g| g.uuid == uuid) {
            group.label = label.into();
            group.mtime = mtime;
        }
    }

    /// Bump an entity's modification time.
    pub fn touch_entity(&self, uuid: Uuid, mtime: DateTime<Utc>) {
        let mut profile = self.profile.write().expect("lock poisoned");
        if let Some(entity) = profile.entities.iter_mut().find(|e| e.uuid == uuid) {
            entity.mtime = mtime;
        }
    }
}

impl Default for MemoryQuerySource {
    fn default() -> Self {
        Self::new()
    }
}

impl QuerySource for MemoryQuerySource {
    fn entities(&self, kind: EntityKind, filter: &EntityFilter) -> QueryResult<Vec<EntityInfo>> {
        let profile = self.profile.read().expect("lock poisoned");

        let group_members: Option<BTreeSet<Uuid>> = match filter.group {
            Some(group) => {
                if !profile.groups.iter().any(|g| g.uuid == group) {
                    return Err(QueryError::UnknownGroup(group));
                }
                Some(
                    profile
                        .memberships
                        .iter()
                        .filter(|m| m.group == group)
                        .map(|m| m.node)
                        .collect(),
                )
            }
            None => None,
        };
        let grouped: BTreeSet<Uuid> =
            profile.memberships.iter().map(|m| m.node).collect();

        let mut matches: Vec<EntityInfo> = profile
            .entities
            .iter()
            .filter(|e| e.kind == kind)
            .filter(|e| filter.modified_after.map_or(true, |t| e.mtime > t))
            .filter(|e| filter.modified_before.map_or(true, |t| e.mtime <= t))
            .filter(|e| {
                group_members
                    .as_ref()
                    .map_or(true, |members| members.contains(&e.uuid))
            })
            .filter(|e| !filter.exclude_grouped || !grouped.contains(&e.uuid))
            .cloned()
            .collect();
        matches.sort_by_key(|e| (e.ctime, e.pk));
        Ok(matches)
    }

    fn all_uuids(&self, kind: EntityKind) -> QueryResult<BTreeSet<Uuid>> {
        let profile = self.profile.read().expect("lock poisoned");
        Ok(profile
            .entities
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.uuid)
            .collect())
    }

    fn entity(&self, uuid: &Uuid) -> QueryResult<Option<EntityInfo>> {
        let profile = self.profile.read().expect("lock poisoned");
        Ok(profile.entities.iter().find(|e| e.uuid == *uuid).cloned())
    }

    fn groups(&self) -> QueryResult<Vec<GroupInfo>> {
        let profile = self.profile.read().expect("lock poisoned");
        let mut groups = profile.groups.clone();
        groups.sort_by_key(|g| g.pk);
        Ok(groups)
    }

    fn group(&self, uuid: &Uuid) -> QueryResult<Option<GroupInfo>> {
        let profile = self.profile.read().expect("lock poisoned");
        Ok(profile.groups.iter().find(|g| g.uuid == *uuid).cloned())
    }

    fn memberships(&self, scope: Option<&[Uuid]>) -> QueryResult<Vec<(Uuid, Uuid)>> {
        let profile = self.profile.read().expect("lock poisoned");
        Ok(profile
            .memberships
            .iter()
            .filter(|m| scope.map_or(true, |groups| groups.contains(&m.group)))
            .map(|m| (m.group, m.node))
            .collect())
    }

    fn called_descendants(&self, workflow: &Uuid) -> QueryResult<Vec<EntityInfo>> {
        let profile = self.profile.read().expect("lock poisoned");
        let mut children: Vec<EntityInfo> = profile
            .entities
            .iter()
            .filter(|e| e.caller == Some(*workflow))
            .cloned()
            .collect();
        children.sort_by_key(|e| (e.ctime, e.pk));
        Ok(children)
    }

    fn input_nodes(&self, entity: &Uuid) -> QueryResult<Vec<(String, EntityInfo)>> {
        let profile = self.profile.read().expect("lock poisoned");
        profile
            .links
            .iter()
            .filter(|l| l.target == *entity)
            .map(|l| {
                profile
                    .entities
                    .iter()
                    .find(|e| e.uuid == l.source)
                    .cloned()
                    .map(|e| (l.label.clone(), e))
                    .ok_or(QueryError::UnknownEntity(l.source))
            })
            .collect()
    }

    fn output_nodes(&self, entity: &Uuid) -> QueryResult<Vec<(String, EntityInfo)>> {
        let profile = self.profile.read().expect("lock poisoned");
        profile
            .links
            .iter()
            .filter(|l| l.source == *entity)
            .map(|l| {
                profile
                    .entities
                    .iter()
                    .find(|e| e.uuid == l.target)
                    .cloned()
                    .map(|e| (l.label.clone(), e))
                    .ok_or(QueryError::UnknownEntity(l.target))
            })
            .collect()
    }
}

impl std::fmt::Debug for MemoryQuerySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let profile = self.profile.read().expect("lock poisoned");
        f.debug_struct("MemoryQuerySource")
            .field("entities", &profile.entities.len())
            .field("groups", &profile.groups.len())
            .finish()
    }
}
