//! The [`DumpEngine`]: runs a full dump pass from detection to commit.
//!
//! A pass acts in a fixed order: entity deletions, group deletions, group
//! renames, membership removals, group content, ungrouped content. The
//! tracker is saved exactly once at the end; a pass that errors out
//! leaves the on-disk tracker exactly as the previous run committed it.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use strata_query::QuerySource;
use strata_store::StoreBackend;
use strata_types::EntityInfo;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{DumpConfig, FailurePolicy};
use crate::detect::{ChangeDetector, DumpChanges, DumpScope};
use crate::error::{DumpError, DumpResult};
use crate::execute::{safe_remove_dir, DumpFailure, EntityExecutor, SAFEGUARD_FILE};
use crate::paths::PathPolicy;
use crate::tracker::{DumpRecord, DumpTracker, RegistryKind};

/// Counters and failures from one pass.
#[derive(Clone, Debug, Default)]
pub struct DumpReport {
    pub primary: usize,
    pub updated: usize,
    pub skipped: usize,
    pub symlinked: usize,
    pub duplicated: usize,
    pub deleted_entities: usize,
    pub deleted_groups: usize,
    pub renamed_groups: usize,
    pub failures: Vec<DumpFailure>,
}

impl DumpReport {
    /// Placements actually written this pass.
    pub fn total_written(&self) -> usize {
        self.primary + self.updated + self.symlinked + self.duplicated
    }
}

/// Owns the tracker for an output root and runs dump passes against it.
pub struct DumpEngine {
    query: Arc<dyn QuerySource>,
    backend: Arc<dyn StoreBackend>,
    config: DumpConfig,
    policy: PathPolicy,
    tracker: DumpTracker,
}

impl DumpEngine {
    /// Open (or initialize) the output root at `base` and load its
    /// tracker.
    pub fn new(
        query: Arc<dyn QuerySource>,
        backend: Arc<dyn StoreBackend>,
        config: DumpConfig,
        base: impl Into<PathBuf>,
    ) -> DumpResult<Self> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        fs::write(base.join(SAFEGUARD_FILE), b"")?;
        let tracker = DumpTracker::load(&base)?;
        let policy = PathPolicy::new(config.clone(), &base);
        Ok(Self {
            query,
            backend,
            config,
            policy,
            tracker,
        })
    }

    /// The loaded tracker. Read-only view for status reporting.
    pub fn tracker(&self) -> &DumpTracker {
        &self.tracker
    }

    /// The path policy for this output root.
    pub fn policy(&self) -> &PathPolicy {
        &self.policy
    }

    /// Run one pass over `scope`.
    pub fn dump(&mut self, scope: &DumpScope) -> DumpResult<DumpReport> {
        let changes = ChangeDetector::new(
            self.query.as_ref(),
            &self.tracker,
            &self.config,
            &self.policy,
        )
        .detect(scope)?;

        let mut report = DumpReport::default();

        self.delete_entities(&changes, &mut report)?;
        self.delete_groups(&changes, &mut report)?;
        self.rename_groups(&changes, &mut report)?;
        self.remove_memberships(&changes)?;

        match scope {
            DumpScope::Entity(uuid) => self.dump_single(&changes, uuid, &mut report)?,
            _ => {
                self.dump_groups(scope, &changes, &mut report)?;
                if self.config.also_ungrouped && matches!(scope, DumpScope::All) {
                    self.dump_ungrouped(&changes, &mut report)?;
                }
            }
        }

        // Commit point. Everything above only touched memory and the
        // output tree; the tracker document changes here or not at all.
        match scope {
            DumpScope::All => self.tracker.previous_mapping = changes.mapping.clone(),
            DumpScope::Group(uuid) => {
                let members = changes.mapping.nodes_of(uuid);
                self.tracker.previous_mapping.set_group(*uuid, members);
            }
            DumpScope::Entity(_) => {}
        }
        self.tracker.last_dump_time = Some(Utc::now());
        self.tracker.save()?;

        info!(
            written = report.total_written(),
            skipped = report.skipped,
            failures = report.failures.len(),
            "dump pass committed"
        );
        Ok(report)
    }

    // ---------------------------------------------------------------
    // Deletions and renames
    // ---------------------------------------------------------------

    fn delete_entities(&mut self, changes: &DumpChanges, report: &mut DumpReport) -> DumpResult<()> {
        for (kind, uuid) in &changes.entities.deleted {
            let Some(record) = self.tracker.remove((*kind).into(), uuid) else {
                continue;
            };
            debug!(uuid = %uuid, path = %record.path.display(), "entity deleted upstream");
            safe_remove_dir(&record.path)?;
            for duplicate in &record.duplicates {
                safe_remove_dir(duplicate)?;
            }
            for symlink in &record.symlinks {
                remove_link(symlink)?;
            }
            report.deleted_entities += 1;
        }
        Ok(())
    }

    fn delete_groups(&mut self, changes: &DumpChanges, report: &mut DumpReport) -> DumpResult<()> {
        for uuid in &changes.groups.deleted {
            let Some(record) = self.tracker.remove(RegistryKind::Groups, uuid) else {
                continue;
            };
            // A group dumped straight at the output root shares it with
            // everything else; only its record goes, never the tree.
            if record.path != self.policy.base() {
                safe_remove_dir(&record.path)?;
                self.tracker.purge_paths_under(&record.path);
            }
            self.tracker.previous_mapping.remove_group(uuid);
            report.deleted_groups += 1;
        }
        Ok(())
    }

    fn rename_groups(&mut self, changes: &DumpChanges, report: &mut DumpReport) -> DumpResult<()> {
        for rename in &changes.renames {
            if !rename.old_path.exists() {
                // Nothing on disk to move; content dumping recreates it.
                continue;
            }
            if !rename.old_path.join(SAFEGUARD_FILE).exists() {
                warn!(
                    path = %rename.old_path.display(),
                    "refusing to rename directory without safeguard marker"
                );
                continue;
            }
            if let Some(parent) = rename.new_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&rename.old_path, &rename.new_path)?;
            // Tracker paths follow the move only once the move happened.
            self.tracker.rebase_paths(&rename.old_path, &rename.new_path);
            report.renamed_groups += 1;
        }
        Ok(())
    }

    /// Drop secondary placements of nodes that left a group. The primary
    /// path is never touched here, whatever group it sits under.
    fn remove_memberships(&mut self, changes: &DumpChanges) -> DumpResult<()> {
        for (node, membership) in &changes.groups.node_membership {
            for group in &membership.removed_from {
                let Some(group_record) = self.tracker.get_record(RegistryKind::Groups, group)
                else {
                    continue;
                };
                let group_root = group_record.path.clone();
                let Some((registry, record)) = self.tracker.get(node) else {
                    continue;
                };
                let symlinks: Vec<PathBuf> = record
                    .symlinks
                    .iter()
                    .filter(|path| path.starts_with(&group_root))
                    .cloned()
                    .collect();
                let duplicates: Vec<PathBuf> = record
                    .duplicates
                    .iter()
                    .filter(|path| path.starts_with(&group_root))
                    .cloned()
                    .collect();
                for path in &symlinks {
                    remove_link(path)?;
                }
                for path in &duplicates {
                    safe_remove_dir(path)?;
                }
                if let Some(record) = self.tracker.record_mut(registry, node) {
                    record.symlinks.retain(|path| !symlinks.contains(path));
                    record.duplicates.retain(|path| !duplicates.contains(path));
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Content
    // ---------------------------------------------------------------

    fn dump_groups(
        &mut self,
        scope: &DumpScope,
        changes: &DumpChanges,
        report: &mut DumpReport,
    ) -> DumpResult<()> {
        let changed: BTreeMap<Uuid, &EntityInfo> = changes
            .entities
            .to_dump()
            .map(|entity| (entity.uuid, entity))
            .collect();
        let sole_target = matches!(scope, DumpScope::Group(_));

        for group_uuid in changes.mapping.group_uuids() {
            let Some(group) = self.query.group(&group_uuid)? else {
                continue;
            };
            let content_root = self.policy.group_content_root(&group, None, sole_target);
            fs::create_dir_all(&content_root)?;
            fs::write(content_root.join(SAFEGUARD_FILE), b"")?;
            if self
                .tracker
                .get_record(RegistryKind::Groups, &group_uuid)
                .is_none()
            {
                self.tracker.add(
                    RegistryKind::Groups,
                    group_uuid,
                    DumpRecord::new(content_root.clone()),
                )?;
            }

            // Changed members in creation order, then nodes that joined
            // this group without changing themselves. A brand-new group
            // has no membership deltas in the diff; every member of it
            // counts as joined.
            let members = changes.mapping.nodes_of(&group_uuid);
            let mut to_place: Vec<EntityInfo> = changes
                .entities
                .to_dump()
                .filter(|entity| members.contains(&entity.uuid))
                .cloned()
                .collect();
            let is_new_group = changes.groups.new.contains(&group_uuid);
            let joined: BTreeSet<Uuid> = members
                .iter()
                .filter(|node| !changed.contains_key(*node))
                .filter(|node| {
                    is_new_group
                        || changes
                            .groups
                            .node_membership
                            .get(*node)
                            .is_some_and(|change| change.added_to.contains(&group_uuid))
                })
                .copied()
                .collect();
            for node in joined {
                if let Some(entity) = self.query.entity(&node)? {
                    to_place.push(entity);
                }
            }

            for entity in &to_place {
                let target = self.policy.node_path(entity, &content_root);
                self.place_guarded(report, entity, &target)?;
            }
        }
        Ok(())
    }

    fn dump_ungrouped(&mut self, changes: &DumpChanges, report: &mut DumpReport) -> DumpResult<()> {
        let ungrouped: Vec<EntityInfo> = changes
            .entities
            .to_dump()
            .filter(|entity| !changes.mapping.is_grouped(&entity.uuid))
            .cloned()
            .collect();
        if ungrouped.is_empty() {
            return Ok(());
        }
        let root = self.policy.ungrouped_root();
        fs::create_dir_all(&root)?;
        fs::write(root.join(SAFEGUARD_FILE), b"")?;
        for entity in &ungrouped {
            let target = self.policy.node_path(entity, &root);
            self.place_guarded(report, entity, &target)?;
        }
        Ok(())
    }

    fn dump_single(
        &mut self,
        changes: &DumpChanges,
        uuid: &Uuid,
        report: &mut DumpReport,
    ) -> DumpResult<()> {
        let Some(entity) = changes.entities.to_dump().find(|e| e.uuid == *uuid).cloned()
        else {
            return Ok(());
        };
        // Tracked entities keep their primary path; a fresh one lands
        // under its first group, or under the ungrouped root.
        let target = match self.tracker.get(uuid) {
            Some((_, record)) => record.path.clone(),
            None => {
                let content_root = match changes.mapping.groups_of(uuid).iter().next() {
                    Some(group_uuid) => {
                        let group = self
                            .query
                            .group(group_uuid)?
                            .ok_or(DumpError::UnknownGroup(*group_uuid))?;
                        self.policy.group_content_root(&group, None, false)
                    }
                    None => self.policy.ungrouped_root(),
                };
                self.policy.node_path(&entity, &content_root)
            }
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        self.place_guarded(report, &entity, &target)
    }

    fn place_guarded(
        &mut self,
        report: &mut DumpReport,
        entity: &EntityInfo,
        target: &Path,
    ) -> DumpResult<()> {
        let outcome = EntityExecutor::new(
            self.query.as_ref(),
            Arc::clone(&self.backend),
            &self.config,
            &mut self.tracker,
            report,
        )
        .dump_entity(entity, target);
        match outcome {
            Ok(()) => Ok(()),
            Err(err) if self.config.failure_policy == FailurePolicy::Continue => {
                warn!(uuid = %entity.uuid, error = %err, "entity dump failed, continuing");
                report.failures.push(DumpFailure {
                    uuid: entity.uuid,
                    error: err.to_string(),
                });
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Remove a symlink placement. A path that is not a symlink is left alone.
fn remove_link(path: &Path) -> DumpResult<()> {
    match path.symlink_metadata() {
        Ok(metadata) if metadata.file_type().is_symlink() => {
            fs::remove_file(path)?;
            Ok(())
        }
        Ok(_) => {
            warn!(path = %path.display(), "expected a symlink, leaving path alone");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

// ---------------------------------------------------------------------------
// Scenario tests: full passes over an in-memory store
// ---------------------------------------------------------------------------
