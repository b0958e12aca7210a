//! Read-only change detection: the diff between the last committed run
//! and the live entity layer.
//!
//! Detection never touches the filesystem or the tracker. It produces a
//! [`DumpChanges`] plan that the engine executes; an aborted detection
//! pass leaves no trace.

use std::collections::BTreeSet;

use strata_query::{EntityFilter, GroupChanges, GroupNodeMapping, QuerySource};
use strata_types::{EntityInfo, EntityKind};
use tracing::debug;
use uuid::Uuid;

use crate::config::DumpConfig;
use crate::error::{DumpError, DumpResult};
use crate::paths::PathPolicy;
use crate::tracker::DumpTracker;

/// What a dump run targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DumpScope {
    /// Everything the query layer knows about.
    All,
    /// One group and its members.
    Group(Uuid),
    /// A single entity.
    Entity(Uuid),
}

/// A group whose directory must move because its label changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupRename {
    pub uuid: Uuid,
    pub old_path: std::path::PathBuf,
    pub new_path: std::path::PathBuf,
}

/// Per-kind entity change sets.
#[derive(Clone, Debug, Default)]
pub struct EntityChanges {
    /// Never dumped before.
    pub new: Vec<EntityInfo>,
    /// Dumped before and modified since.
    pub modified: Vec<EntityInfo>,
    /// Tracked but no longer present in the entity layer.
    pub deleted: Vec<(EntityKind, Uuid)>,
}

impl EntityChanges {
    /// New and modified entities together, new first.
    pub fn to_dump(&self) -> impl Iterator<Item = &EntityInfo> {
        self.new.iter().chain(self.modified.iter())
    }
}

/// The full plan for one run.
#[derive(Clone, Debug, Default)]
pub struct DumpChanges {
    pub entities: EntityChanges,
    pub groups: GroupChanges,
    pub renames: Vec<GroupRename>,
    /// The freshly built mapping the plan was computed against.
    pub mapping: GroupNodeMapping,
}

/// Computes the plan. Borrows its collaborators for the duration of one
/// detection pass.
pub struct ChangeDetector<'a> {
    query: &'a dyn QuerySource,
    tracker: &'a DumpTracker,
    config: &'a DumpConfig,
    policy: &'a PathPolicy,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(
        query: &'a dyn QuerySource,
        tracker: &'a DumpTracker,
        config: &'a DumpConfig,
        policy: &'a PathPolicy,
    ) -> Self {
        Self {
            query,
            tracker,
            config,
            policy,
        }
    }

    /// Compute the plan for `scope`.
    pub fn detect(&self, scope: &DumpScope) -> DumpResult<DumpChanges> {
        let mapping = self.build_mapping(scope)?;

        let mut changes = DumpChanges {
            entities: match scope {
                DumpScope::Entity(uuid) => self.detect_single(uuid)?,
                _ => self.detect_entities(scope, &mapping)?,
            },
            mapping,
            ..Default::default()
        };

        // Entity scope never reconciles groups.
        if !matches!(scope, DumpScope::Entity(_)) {
            let previous = match scope {
                DumpScope::Group(_) => self
                    .tracker
                    .previous_mapping
                    .restricted_to(&changes.mapping.group_uuids()),
                _ => self.tracker.previous_mapping.clone(),
            };
            changes.groups = GroupNodeMapping::diff(&previous, &changes.mapping);
            changes.renames = self.detect_renames(scope, &changes.mapping)?;
        }

        debug!(
            new = changes.entities.new.len(),
            modified = changes.entities.modified.len(),
            deleted = changes.entities.deleted.len(),
            renames = changes.renames.len(),
            "detection pass complete"
        );
        Ok(changes)
    }

    fn build_mapping(&self, scope: &DumpScope) -> DumpResult<GroupNodeMapping> {
        let mapping = match scope {
            DumpScope::Group(uuid) => {
                if self.query.group(uuid)?.is_none() {
                    return Err(DumpError::UnknownGroup(*uuid));
                }
                GroupNodeMapping::build(self.query, Some(&[*uuid]))?
            }
            _ => GroupNodeMapping::build(self.query, None)?,
        };
        Ok(mapping)
    }

    fn detect_entities(
        &self,
        scope: &DumpScope,
        mapping: &GroupNodeMapping,
    ) -> DumpResult<EntityChanges> {
        let mut filter = EntityFilter::default();
        if let Some(instant) = self.tracker.last_dump_time {
            filter = filter.modified_after(instant);
        }
        if let DumpScope::Group(uuid) = scope {
            filter = filter.in_group(*uuid);
        }

        let mut changes = EntityChanges::default();
        let mut seen: BTreeSet<Uuid> = BTreeSet::new();
        for kind in EntityKind::ALL {
            for entity in self.query.entities(kind, &filter)? {
                seen.insert(entity.uuid);
                match self.tracker.get(&entity.uuid) {
                    None => {
                        if self.is_top_level(&entity, mapping) {
                            changes.new.push(entity);
                        }
                    }
                    Some((_, record)) => {
                        // A tracked candidate only counts when it is newer
                        // than what the last run wrote.
                        let stale = record
                            .dir_mtime
                            .map_or(true, |written| entity.mtime > written);
                        if stale {
                            changes.modified.push(entity);
                        }
                    }
                }
            }
        }

        // The time filter compares against the wall-clock commit instant,
        // while tracked entities change on the entity layer's own clock.
        // An entity whose new mtime predates the commit instant never
        // passes the filter, so every tracked record is checked against
        // its own recorded mtime directly.
        for kind in EntityKind::ALL {
            for uuid in self.tracker.uuids(kind.into()) {
                if seen.contains(&uuid) {
                    continue;
                }
                if matches!(scope, DumpScope::Group(_)) && !mapping.is_grouped(&uuid) {
                    continue;
                }
                let Some(entity) = self.query.entity(&uuid)? else {
                    // Gone upstream; the deletion pass below reports it.
                    continue;
                };
                let Some(record) = self.tracker.get_record(kind.into(), &uuid) else {
                    continue;
                };
                let stale = record
                    .dir_mtime
                    .map_or(true, |written| entity.mtime > written);
                if stale {
                    changes.modified.push(entity);
                }
            }
        }

        if matches!(scope, DumpScope::All) {
            changes.deleted = self.detect_deletions()?;
        }
        Ok(changes)
    }

    fn detect_single(&self, uuid: &Uuid) -> DumpResult<EntityChanges> {
        let entity = self
            .query
            .entity(uuid)?
            .ok_or(DumpError::UnknownEntity(*uuid))?;
        let mut changes = EntityChanges::default();
        match self.tracker.get(uuid) {
            None => changes.new.push(entity),
            Some((_, record)) => {
                let stale = record
                    .dir_mtime
                    .map_or(true, |written| entity.mtime > written);
                if stale {
                    changes.modified.push(entity);
                }
            }
        }
        Ok(changes)
    }

    fn detect_deletions(&self) -> DumpResult<Vec<(EntityKind, Uuid)>> {
        let mut deleted = Vec::new();
        for kind in EntityKind::ALL {
            let live = self.query.all_uuids(kind)?;
            for uuid in self.tracker.uuids(kind.into()) {
                if !live.contains(&uuid) {
                    deleted.push((kind, uuid));
                }
            }
        }
        Ok(deleted)
    }

    /// Sub-entities of a tracked caller are dumped beneath their caller,
    /// not as standalone candidates, unless grouped in their own right or
    /// nested dumping is on.
    fn is_top_level(&self, entity: &EntityInfo, mapping: &GroupNodeMapping) -> bool {
        if entity.caller.is_none() || self.config.include_nested {
            return true;
        }
        mapping.is_grouped(&entity.uuid)
    }

    /// Compare each surviving group's tracked path with where the path
    /// policy would place it today. A mismatch means the label changed
    /// and the directory must move.
    fn detect_renames(
        &self,
        scope: &DumpScope,
        mapping: &GroupNodeMapping,
    ) -> DumpResult<Vec<GroupRename>> {
        let previous = self.tracker.previous_mapping.group_uuids();
        let current = mapping.group_uuids();
        let sole_target = matches!(scope, DumpScope::Group(_));

        let mut renames = Vec::new();
        for uuid in previous.intersection(&current) {
            let Some(record) = self.tracker.get_record(crate::tracker::RegistryKind::Groups, uuid)
            else {
                continue;
            };
            // A group dumped directly at the output root has no directory
            // of its own to rename.
            if record.path == self.policy.base() {
                continue;
            }
            let Some(group) = self.query.group(uuid)? else {
                continue;
            };
            let expected = self.policy.group_content_root(&group, None, sole_target);
            if expected != record.path {
                renames.push(GroupRename {
                    uuid: *uuid,
                    old_path: record.path.clone(),
                    new_path: expected,
                });
            }
        }
        Ok(renames)
    }
}

// ---------------------------------------------------------------------------
// Helper set intersection over the two scopes lives in tests with the
// engine; detector unit tests cover classification only.
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use chrono::{Duration, TimeZone, Utc};
    use strata_query::MemoryQuerySource;
    use strata_types::GroupInfo;
    use tempfile::TempDir;

    use crate::tracker::{DumpRecord, RegistryKind};

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn entity(n: u128, kind: EntityKind) -> EntityInfo {
        let instant = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        EntityInfo {
            uuid: uuid(n),
            pk: n as i64,
            kind,
            label: Some(format!("node-{n}")),
            process_label: None,
            process_type: None,
            ctime: instant,
            mtime: instant,
            is_stored: true,
            caller: None,
            repository_metadata: serde_json::Value::Null,
        }
    }

    fn group(n: u128, label: &str) -> GroupInfo {
        GroupInfo {
            uuid: uuid(n),
            pk: n as i64,
            label: label.to_string(),
            mtime: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    struct Fixture {
        query: MemoryQuerySource,
        tracker: DumpTracker,
        config: DumpConfig,
        _dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            Self {
                query: MemoryQuerySource::default(),
                tracker: DumpTracker::new(dir.path()),
                config: DumpConfig::default(),
                _dir: dir,
            }
        }

        fn detect(&self, scope: &DumpScope) -> DumpResult<DumpChanges> {
            let policy = PathPolicy::new(self.config.clone(), self.tracker.root());
            ChangeDetector::new(&self.query, &self.tracker, &self.config, &policy).detect(scope)
        }
    }

    #[test]
    fn untracked_entities_are_new() {
        let fixture = Fixture::new();
        fixture.query.add_entity(entity(1, EntityKind::Calculation));
        let changes = fixture.detect(&DumpScope::All).unwrap();
        assert_eq!(changes.entities.new.len(), 1);
        assert!(changes.entities.modified.is_empty());
    }

    #[test]
    fn unchanged_tracked_entities_are_skipped() {
        let mut fixture = Fixture::new();
        let calc = entity(1, EntityKind::Calculation);
        fixture.query.add_entity(calc.clone());
        let mut record = DumpRecord::new("anywhere".into());
        record.dir_mtime = Some(calc.mtime);
        fixture
            .tracker
            .add(RegistryKind::Calculations, calc.uuid, record)
            .unwrap();

        let changes = fixture.detect(&DumpScope::All).unwrap();
        assert!(changes.entities.new.is_empty());
        assert!(changes.entities.modified.is_empty());
    }

    #[test]
    fn tracked_entity_newer_than_record_is_modified() {
        let mut fixture = Fixture::new();
        let calc = entity(1, EntityKind::Calculation);
        fixture.query.add_entity(calc.clone());
        let mut record = DumpRecord::new("anywhere".into());
        record.dir_mtime = Some(calc.mtime - Duration::hours(1));
        fixture
            .tracker
            .add(RegistryKind::Calculations, calc.uuid, record)
            .unwrap();

        let changes = fixture.detect(&DumpScope::All).unwrap();
        assert_eq!(changes.entities.modified.len(), 1);
    }

    #[test]
    fn sub_entities_are_filtered_unless_nested_or_grouped() {
        let mut fixture = Fixture::new();
        let parent = entity(1, EntityKind::Workflow);
        let mut child = entity(2, EntityKind::Calculation);
        child.caller = Some(parent.uuid);
        fixture.query.add_entity(parent);
        fixture.query.add_entity(child.clone());

        let changes = fixture.detect(&DumpScope::All).unwrap();
        assert_eq!(changes.entities.new.len(), 1);

        fixture.config.include_nested = true;
        let changes = fixture.detect(&DumpScope::All).unwrap();
        assert_eq!(changes.entities.new.len(), 2);

        fixture.config.include_nested = false;
        fixture.query.add_group(group(9, "alpha"));
        fixture.query.add_membership(uuid(9), child.uuid);
        let changes = fixture.detect(&DumpScope::All).unwrap();
        assert_eq!(changes.entities.new.len(), 2);
    }

    #[test]
    fn tracked_uuid_absent_from_query_is_deleted() {
        let mut fixture = Fixture::new();
        fixture
            .tracker
            .add(
                RegistryKind::Data,
                uuid(7),
                DumpRecord::new("somewhere".into()),
            )
            .unwrap();
        let changes = fixture.detect(&DumpScope::All).unwrap();
        assert_eq!(changes.entities.deleted, vec![(EntityKind::Data, uuid(7))]);
    }

    #[test]
    fn group_scope_rejects_unknown_group() {
        let fixture = Fixture::new();
        let err = fixture.detect(&DumpScope::Group(uuid(1))).unwrap_err();
        assert!(matches!(err, DumpError::UnknownGroup(_)));
    }

    #[test]
    fn group_scope_ignores_other_groups_in_diff() {
        let mut fixture = Fixture::new();
        fixture.query.add_group(group(1, "target"));
        fixture.query.add_group(group(2, "other"));
        // Snapshot knows a group the scoped run never queries; it must not
        // be reported deleted.
        fixture.tracker.previous_mapping.set_group(uuid(2), [uuid(20)].into());
        fixture.tracker.previous_mapping.set_group(uuid(1), BTreeSet::new());

        let changes = fixture.detect(&DumpScope::Group(uuid(1))).unwrap();
        assert!(changes.groups.deleted.is_empty());
    }

    #[test]
    fn entity_scope_looks_up_one_entity() {
        let fixture = Fixture::new();
        let data = entity(3, EntityKind::Data);
        fixture.query.add_entity(data.clone());

        let changes = fixture.detect(&DumpScope::Entity(data.uuid)).unwrap();
        assert_eq!(changes.entities.new.len(), 1);
        assert!(changes.groups.is_empty());
        assert!(changes.renames.is_empty());

        let err = fixture.detect(&DumpScope::Entity(uuid(99))).unwrap_err();
        assert!(matches!(err, DumpError::UnknownEntity(_)));
    }

    #[test]
    fn relabeled_group_is_planned_as_rename() {
        let mut fixture = Fixture::new();
        fixture.query.add_group(group(1, "renamed"));
        fixture.tracker.previous_mapping.set_group(uuid(1), BTreeSet::new());
        let old_path = fixture.tracker.root().join("groups/original-1");
        fixture
            .tracker
            .add(RegistryKind::Groups, uuid(1), DumpRecord::new(old_path.clone()))
            .unwrap();

        let changes = fixture.detect(&DumpScope::All).unwrap();
        assert_eq!(changes.renames.len(), 1);
        assert_eq!(changes.renames[0].old_path, old_path);
        assert_eq!(
            changes.renames[0].new_path,
            fixture.tracker.root().join("groups/renamed-1")
        );
    }

    #[test]
    fn group_dumped_at_root_is_never_renamed() {
        let mut fixture = Fixture::new();
        fixture.query.add_group(group(1, "renamed"));
        fixture.tracker.previous_mapping.set_group(uuid(1), BTreeSet::new());
        fixture
            .tracker
            .add(
                RegistryKind::Groups,
                uuid(1),
                DumpRecord::new(fixture.tracker.root().to_path_buf()),
            )
            .unwrap();

        let changes = fixture.detect(&DumpScope::Group(uuid(1))).unwrap();
        assert!(changes.renames.is_empty());
    }

    #[test]
    fn tracked_entity_older_than_last_dump_is_still_modified() {
        // The entity layer's clock is independent of the commit instant:
        // a tracked entity can pick up an mtime that is newer than its
        // record but older than last_dump_time. It must still be updated.
        let mut fixture = Fixture::new();
        let calc = entity(1, EntityKind::Calculation);
        fixture.query.add_entity(calc.clone());
        let mut record = DumpRecord::new("anywhere".into());
        record.dir_mtime = Some(calc.mtime - Duration::hours(2));
        fixture
            .tracker
            .add(RegistryKind::Calculations, calc.uuid, record)
            .unwrap();
        fixture.tracker.last_dump_time = Some(calc.mtime + Duration::hours(1));

        let changes = fixture.detect(&DumpScope::All).unwrap();
        assert!(changes.entities.new.is_empty());
        assert_eq!(changes.entities.modified.len(), 1);
        assert_eq!(changes.entities.modified[0].uuid, calc.uuid);
    }

    #[test]
    fn incremental_filter_uses_last_dump_time() {
        let mut fixture = Fixture::new();
        let calc = entity(1, EntityKind::Calculation);
        fixture.query.add_entity(calc.clone());
        fixture.tracker.last_dump_time = Some(calc.mtime + Duration::hours(1));

        let changes = fixture.detect(&DumpScope::All).unwrap();
        assert!(changes.entities.new.is_empty());
    }
}
