//! Entity executors: write one entity's directory tree to disk and keep
//! the tracker record in step.
//!
//! Placement decisions are pure ([`determine_action`]); the executor acts
//! on them. An entity's first placement becomes its primary path and
//! stays so for its tracked life; every later placement is a symlink or
//! a duplicate. Failed writes clean their partial directory up before the
//! error propagates, except on permission errors where cleanup would fail
//! the same way.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_query::QuerySource;
use strata_repo::Repository;
use strata_store::StoreBackend;
use strata_types::{EntityInfo, EntityKind};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::DumpConfig;
use crate::engine::DumpReport;
use crate::error::{DumpError, DumpResult};
use crate::tracker::{DumpRecord, DumpTracker};

/// Marker file written into every directory the engine creates. Automatic
/// deletion refuses any directory that does not carry it.
pub const SAFEGUARD_FILE: &str = ".strata_dump_safeguard";

/// Name of the per-entity metadata document.
pub const METADATA_FILE: &str = "node_metadata.json";

/// What to do with one entity at one target path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DumpAction {
    /// First placement ever; becomes the primary path.
    Primary,
    /// Rewrite the primary path in place.
    Update,
    /// Nothing to do here.
    Skip,
    /// Secondary placement as a symlink to the primary path.
    Symlink,
    /// Secondary placement as a full copy.
    Duplicate,
}

/// One entity that failed to dump during a continue-on-error run.
#[derive(Clone, Debug)]
pub struct DumpFailure {
    pub uuid: uuid::Uuid,
    pub error: String,
}

/// Decide the placement action for `entity` at `target`.
///
/// An untracked entity always gets a primary placement. At the recorded
/// primary path, the entity is rewritten when it is newer than what was
/// written, or when the directory vanished from disk (a parent update
/// deletes nested children's directories; they must come back). Anywhere
/// else the placement is secondary: skipped if already realized, a
/// symlink for calculations under `symlink_duplicates`, a full copy
/// otherwise.
pub fn determine_action(
    tracker: &DumpTracker,
    entity: &EntityInfo,
    target: &Path,
    config: &DumpConfig,
) -> DumpAction {
    let Some((_, record)) = tracker.get(&entity.uuid) else {
        return DumpAction::Primary;
    };

    if record.path == target {
        if !target.exists() {
            return DumpAction::Update;
        }
        return match record.dir_mtime {
            Some(written) if entity.mtime <= written => DumpAction::Skip,
            _ => DumpAction::Update,
        };
    }

    let realized = record
        .symlinks
        .iter()
        .chain(record.duplicates.iter())
        .any(|path| path.as_path() == target);
    if realized && target.symlink_metadata().is_ok() {
        return DumpAction::Skip;
    }
    if entity.kind == EntityKind::Calculation && config.symlink_duplicates {
        DumpAction::Symlink
    } else {
        DumpAction::Duplicate
    }
}

/// Remove a directory the engine owns. Refuses (with a warning) when the
/// safeguard marker is absent, so user files sitting where the engine
/// wants to delete are never destroyed.
pub fn safe_remove_dir(path: &Path) -> DumpResult<bool> {
    if !path.exists() {
        return Ok(false);
    }
    if !path.join(SAFEGUARD_FILE).exists() {
        warn!(
            path = %path.display(),
            "refusing to delete directory without safeguard marker"
        );
        return Ok(false);
    }
    fs::remove_dir_all(path)?;
    Ok(true)
}

/// Writes entities to disk for one run. Borrows the tracker and report
/// mutably; the engine owns both.
pub struct EntityExecutor<'a> {
    query: &'a dyn QuerySource,
    backend: Arc<dyn StoreBackend>,
    config: &'a DumpConfig,
    tracker: &'a mut DumpTracker,
    report: &'a mut DumpReport,
}

impl<'a> EntityExecutor<'a> {
    pub fn new(
        query: &'a dyn QuerySource,
        backend: Arc<dyn StoreBackend>,
        config: &'a DumpConfig,
        tracker: &'a mut DumpTracker,
        report: &'a mut DumpReport,
    ) -> Self {
        Self {
            query,
            backend,
            config,
            tracker,
            report,
        }
    }

    /// Dump `entity` at `target`, then everything it calls beneath it.
    ///
    /// An explicit worklist instead of recursion: workflow call trees can
    /// be deep, and the queue keeps sibling order stable.
    pub fn dump_entity(&mut self, entity: &EntityInfo, target: &Path) -> DumpResult<()> {
        let mut queue: VecDeque<(EntityInfo, PathBuf)> = VecDeque::new();
        queue.push_back((entity.clone(), target.to_path_buf()));

        while let Some((entity, target)) = queue.pop_front() {
            let action = determine_action(self.tracker, &entity, &target, self.config);
            debug!(uuid = %entity.uuid, action = ?action, target = %target.display(), "placing entity");
            match action {
                DumpAction::Skip => {
                    self.report.skipped += 1;
                }
                DumpAction::Primary => {
                    self.write_checked(&entity, &target)?;
                    let mut record = DumpRecord::new(target.clone());
                    record.dir_mtime = Some(entity.mtime);
                    record.dir_size = Some(tree_size(&target)?);
                    self.tracker.add(entity.kind.into(), entity.uuid, record)?;
                    self.report.primary += 1;
                    self.enqueue_children(&entity, &target, &mut queue)?;
                }
                DumpAction::Update => {
                    safe_remove_dir(&target)?;
                    self.write_checked(&entity, &target)?;
                    let size = tree_size(&target)?;
                    if let Some(record) =
                        self.tracker.record_mut(entity.kind.into(), &entity.uuid)
                    {
                        record.dir_mtime = Some(entity.mtime);
                        record.dir_size = Some(size);
                    }
                    self.report.updated += 1;
                    self.enqueue_children(&entity, &target, &mut queue)?;
                }
                DumpAction::Symlink => {
                    let Some((registry, record)) = self.tracker.get(&entity.uuid) else {
                        return Err(DumpError::CorruptTrackerState(format!(
                            "symlink placement for untracked entity {}",
                            entity.uuid
                        )));
                    };
                    let primary = record.path.clone();
                    create_symlink(&primary, &target)?;
                    if let Some(record) = self.tracker.record_mut(registry, &entity.uuid) {
                        record.symlinks.push(target.clone());
                    }
                    self.report.symlinked += 1;
                }
                DumpAction::Duplicate => {
                    self.write_checked(&entity, &target)?;
                    if let Some((registry, _)) = self.tracker.get(&entity.uuid) {
                        if let Some(record) = self.tracker.record_mut(registry, &entity.uuid) {
                            record.duplicates.push(target.clone());
                        }
                    }
                    self.report.duplicated += 1;
                    self.enqueue_children(&entity, &target, &mut queue)?;
                }
            }
        }
        Ok(())
    }

    /// Enqueue a workflow's direct callees beneath `target`, numbered in
    /// creation order.
    fn enqueue_children(
        &self,
        entity: &EntityInfo,
        target: &Path,
        queue: &mut VecDeque<(EntityInfo, PathBuf)>,
    ) -> DumpResult<()> {
        if entity.kind != EntityKind::Workflow {
            return Ok(());
        }
        for (index, child) in self
            .query
            .called_descendants(&entity.uuid)?
            .into_iter()
            .enumerate()
        {
            let child_dir = target.join(format!("{:02}-{}", index + 1, child.directory_name()));
            queue.push_back((child, child_dir));
        }
        Ok(())
    }

    /// Write with cleanup: a failed write removes its partial directory
    /// before the error propagates. Permission errors skip cleanup since
    /// removal would fail the same way.
    fn write_checked(&self, entity: &EntityInfo, target: &Path) -> DumpResult<()> {
        if let Err(err) = self.write_content(entity, target) {
            let permission = matches!(
                &err,
                DumpError::Io(io) if io.kind() == std::io::ErrorKind::PermissionDenied
            );
            if !permission {
                if let Err(cleanup) = fs::remove_dir_all(target) {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!(
                            path = %target.display(),
                            error = %cleanup,
                            "failed to clean up partial dump directory"
                        );
                    }
                }
            }
            return Err(err);
        }
        Ok(())
    }

    fn write_content(&self, entity: &EntityInfo, target: &Path) -> DumpResult<()> {
        fs::create_dir_all(target)?;
        fs::write(target.join(SAFEGUARD_FILE), b"")?;
        let metadata = serde_json::to_vec_pretty(entity)
            .map_err(|err| DumpError::Serialization(err.to_string()))?;
        fs::write(target.join(METADATA_FILE), metadata)?;

        match entity.kind {
            EntityKind::Calculation => {
                self.write_repository(&entity.repository_metadata, &target.join("inputs"))?;
                for (label, node) in self.query.input_nodes(&entity.uuid)? {
                    self.write_repository(
                        &node.repository_metadata,
                        &target.join("node_inputs").join(label),
                    )?;
                }
                for (label, node) in self.query.output_nodes(&entity.uuid)? {
                    self.write_repository(
                        &node.repository_metadata,
                        &target.join("node_outputs").join(label),
                    )?;
                }
            }
            EntityKind::Data => {
                self.write_repository(&entity.repository_metadata, &target.join("content"))?;
            }
            // A workflow directory holds metadata and callee directories.
            EntityKind::Workflow => {}
        }
        Ok(())
    }

    /// Materialize a serialized repository tree under `dir`. A null or
    /// empty tree writes nothing, not even `dir` itself.
    fn write_repository(&self, metadata: &serde_json::Value, dir: &Path) -> DumpResult<()> {
        if metadata.is_null() {
            return Ok(());
        }
        let repository = Repository::from_serialized(Arc::clone(&self.backend), metadata)?;
        if repository.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(dir)?;
        for (path, key) in repository.walk("")? {
            if path.is_empty() {
                continue;
            }
            let dest = dir.join(&path);
            match key {
                None => fs::create_dir_all(&dest)?,
                Some(_) => {
                    if let Some(parent) = dest.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    let mut reader = repository.open(&path)?;
                    let mut file = fs::File::create(&dest)?;
                    std::io::copy(&mut reader, &mut file)?;
                }
            }
        }
        Ok(())
    }
}

/// Total bytes of regular files under `path`.
pub fn tree_size(path: &Path) -> DumpResult<u64> {
    let mut total = 0;
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(std::io::Error::from)?.len();
        }
    }
    Ok(total)
}

/// Create `link` pointing at `primary`, replacing a stale link in place.
fn create_symlink(primary: &Path, link: &Path) -> std::io::Result<()> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Ok(existing) = link.symlink_metadata() {
        if existing.file_type().is_symlink() {
            fs::remove_file(link)?;
        }
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(primary, link)?;
    #[cfg(windows)]
    std::os::windows::fs::symlink_dir(primary, link)?;
    Ok(())
}
