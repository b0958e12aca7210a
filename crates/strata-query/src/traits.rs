use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use strata_types::{EntityInfo, EntityKind, GroupInfo};
use uuid::Uuid;

use crate::error::QueryResult;

/// Filter set for entity queries.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntityFilter {
    /// Only entities modified strictly after this instant.
    pub modified_after: Option<DateTime<Utc>>,
    /// Only entities modified at or before this instant.
    pub modified_before: Option<DateTime<Utc>>,
    /// Only members of this group.
    pub group: Option<Uuid>,
    /// Only entities that belong to no group at all.
    pub exclude_grouped: bool,
}

impl EntityFilter {
    /// Restrict to entities modified strictly after `instant`.
    pub fn modified_after(mut self, instant: DateTime<Utc>) -> Self {
        self.modified_after = Some(instant);
        self
    }

    /// Restrict to members of `group`.
    pub fn in_group(mut self, group: Uuid) -> Self {
        self.group = Some(group);
        self
    }

    /// Restrict to entities without any group membership.
    pub fn ungrouped(mut self) -> Self {
        self.exclude_grouped = true;
        self
    }
}

/// The query capability the entity layer provides.
///
/// Any failure from an implementation aborts the detection pass that
/// issued the query; detection commits no state, so an aborted pass is
/// safe to retry.
pub trait QuerySource: Send + Sync {
    /// Entities of one kind matching `filter`.
    fn entities(&self, kind: EntityKind, filter: &EntityFilter) -> QueryResult<Vec<EntityInfo>>;

    /// All live UUIDs of one kind, unfiltered. Used for deletion detection.
    fn all_uuids(&self, kind: EntityKind) -> QueryResult<BTreeSet<Uuid>>;

    /// Look up one entity.
    fn entity(&self, uuid: &Uuid) -> QueryResult<Option<EntityInfo>>;

    /// All live groups.
    fn groups(&self) -> QueryResult<Vec<GroupInfo>>;

    /// Look up one group.
    fn group(&self, uuid: &Uuid) -> QueryResult<Option<GroupInfo>>;

    /// All `(group, member)` pairs, optionally scoped to a group subset.
    fn memberships(&self, scope: Option<&[Uuid]>) -> QueryResult<Vec<(Uuid, Uuid)>>;

    /// The entities directly called by a workflow, in creation-time order.
    fn called_descendants(&self, workflow: &Uuid) -> QueryResult<Vec<EntityInfo>>;

    /// Incoming data links of an entity as `(link label, node)` pairs.
    fn input_nodes(&self, entity: &Uuid) -> QueryResult<Vec<(String, EntityInfo)>>;

    /// Outgoing data links of an entity as `(link label, node)` pairs.
    fn output_nodes(&self, entity: &Uuid) -> QueryResult<Vec<(String, EntityInfo)>>;
}
