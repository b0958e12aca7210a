//! The persisted dump tracker: what earlier runs wrote, and where.
//!
//! One JSON document at the output root records every dumped entity and
//! group, keyed by UUID, plus the previous group/node mapping snapshot
//! and the last dump time. Paths are stored relative to the output root
//! so the whole tree can be moved; they are re-anchored on load.
//!
//! # Design Rules
//!
//! 1. A UUID lives in exactly one registry. Finding it in two is corrupt
//!    state and fails the load.
//! 2. `save` is atomic: write to a temporary file in the same directory,
//!    then rename over the old document.
//! 3. An absent tracker file means a fresh start; a malformed one does
//!    not.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_query::GroupNodeMapping;
use strata_types::EntityKind;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DumpError, DumpResult};

/// Name of the tracker document inside the output root.
pub const TRACKER_FILE: &str = ".strata_dump.json";

/// Everything the tracker remembers about one dumped entity or group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DumpRecord {
    /// The primary path. Fixed for the tracked life of the entity.
    pub path: PathBuf,
    /// Secondary placements realized as symlinks to the primary path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symlinks: Vec<PathBuf>,
    /// Secondary placements realized as full copies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub duplicates: Vec<PathBuf>,
    /// Entity mtime at the moment the primary path was last written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir_mtime: Option<DateTime<Utc>>,
    /// Total bytes under the primary path when last written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir_size: Option<u64>,
}

impl DumpRecord {
    /// A record for a freshly written primary path.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            ..Default::default()
        }
    }

    /// All placements: the primary path followed by every alias.
    pub fn all_paths(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.path)
            .chain(self.symlinks.iter())
            .chain(self.duplicates.iter())
    }
}

/// Which registry a record lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryKind {
    Calculations,
    Workflows,
    Data,
    Groups,
}

impl From<EntityKind> for RegistryKind {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Calculation => RegistryKind::Calculations,
            EntityKind::Workflow => RegistryKind::Workflows,
            EntityKind::Data => RegistryKind::Data,
        }
    }
}

impl RegistryKind {
    const ALL: [RegistryKind; 4] = [
        RegistryKind::Calculations,
        RegistryKind::Workflows,
        RegistryKind::Data,
        RegistryKind::Groups,
    ];
}

/// On-disk shape of the tracker document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TrackerDocument {
    #[serde(default)]
    calculations: BTreeMap<Uuid, DumpRecord>,
    #[serde(default)]
    workflows: BTreeMap<Uuid, DumpRecord>,
    #[serde(default)]
    data: BTreeMap<Uuid, DumpRecord>,
    #[serde(default)]
    groups: BTreeMap<Uuid, DumpRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_dump_time: Option<DateTime<Utc>>,
    #[serde(default)]
    group_node_mapping: GroupNodeMapping,
}

/// The tracker, anchored at an output root. All record paths held in
/// memory are absolute; relativization happens only at save time.
#[derive(Debug)]
pub struct DumpTracker {
    root: PathBuf,
    calculations: BTreeMap<Uuid, DumpRecord>,
    workflows: BTreeMap<Uuid, DumpRecord>,
    data: BTreeMap<Uuid, DumpRecord>,
    groups: BTreeMap<Uuid, DumpRecord>,
    /// Instant the last successful run committed.
    pub last_dump_time: Option<DateTime<Utc>>,
    /// Group/node mapping snapshot from the last successful run.
    pub previous_mapping: GroupNodeMapping,
}

impl DumpTracker {
    /// An empty tracker anchored at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            calculations: BTreeMap::new(),
            workflows: BTreeMap::new(),
            data: BTreeMap::new(),
            groups: BTreeMap::new(),
            last_dump_time: None,
            previous_mapping: GroupNodeMapping::new(),
        }
    }

    /// Load the tracker from `root`, or start fresh if no document exists.
    pub fn load(root: impl Into<PathBuf>) -> DumpResult<Self> {
        let root = root.into();
        let file = root.join(TRACKER_FILE);
        let raw = match fs::read_to_string(&file) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %file.display(), "no tracker document, starting fresh");
                return Ok(Self::new(root));
            }
            Err(err) => return Err(err.into()),
        };
        let document: TrackerDocument = serde_json::from_str(&raw)
            .map_err(|err| DumpError::CorruptTrackerState(err.to_string()))?;

        let mut tracker = Self {
            root: root.clone(),
            calculations: document.calculations,
            workflows: document.workflows,
            data: document.data,
            groups: document.groups,
            last_dump_time: document.last_dump_time,
            previous_mapping: document.group_node_mapping,
        };
        tracker.check_disjoint()?;
        for registry in RegistryKind::ALL {
            for record in tracker.registry_mut(registry).values_mut() {
                absolutize(record, &root);
            }
        }
        Ok(tracker)
    }

    /// Persist the tracker atomically at its root.
    pub fn save(&self) -> DumpResult<()> {
        let document = TrackerDocument {
            calculations: self.relativized(&self.calculations),
            workflows: self.relativized(&self.workflows),
            data: self.relativized(&self.data),
            groups: self.relativized(&self.groups),
            last_dump_time: self.last_dump_time,
            group_node_mapping: self.previous_mapping.clone(),
        };
        let json = serde_json::to_string_pretty(&document)
            .map_err(|err| DumpError::Serialization(err.to_string()))?;

        let mut staged = NamedTempFile::new_in(&self.root)?;
        staged.write_all(json.as_bytes())?;
        staged
            .persist(self.root.join(TRACKER_FILE))
            .map_err(|err| DumpError::Io(err.error))?;
        Ok(())
    }

    /// The output root this tracker is anchored at.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look up a record by UUID across all registries.
    pub fn get(&self, uuid: &Uuid) -> Option<(RegistryKind, &DumpRecord)> {
        for registry in RegistryKind::ALL {
            if let Some(record) = self.registry(registry).get(uuid) {
                return Some((registry, record));
            }
        }
        None
    }

    /// Look up a record in one registry.
    pub fn get_record(&self, registry: RegistryKind, uuid: &Uuid) -> Option<&DumpRecord> {
        self.registry(registry).get(uuid)
    }

    /// Mutable record lookup in one registry.
    pub fn record_mut(&mut self, registry: RegistryKind, uuid: &Uuid) -> Option<&mut DumpRecord> {
        self.registry_mut(registry).get_mut(uuid)
    }

    /// Register a record. A UUID already present in a different registry
    /// is corrupt state.
    pub fn add(&mut self, registry: RegistryKind, uuid: Uuid, record: DumpRecord) -> DumpResult<()> {
        for other in RegistryKind::ALL {
            if other != registry && self.registry(other).contains_key(&uuid) {
                return Err(DumpError::CorruptTrackerState(format!(
                    "uuid {uuid} already tracked in another registry"
                )));
            }
        }
        self.registry_mut(registry).insert(uuid, record);
        Ok(())
    }

    /// Drop a record, returning it if present.
    pub fn remove(&mut self, registry: RegistryKind, uuid: &Uuid) -> Option<DumpRecord> {
        self.registry_mut(registry).remove(uuid)
    }

    /// Returns `true` if `uuid` is tracked in any registry.
    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.get(uuid).is_some()
    }

    /// All tracked UUIDs in one registry.
    pub fn uuids(&self, registry: RegistryKind) -> Vec<Uuid> {
        self.registry(registry).keys().copied().collect()
    }

    /// Rewrite every path under `old_root` to live under `new_root`.
    /// Used after a group directory is renamed on disk.
    pub fn rebase_paths(&mut self, old_root: &Path, new_root: &Path) {
        for registry in RegistryKind::ALL {
            for record in self.registry_mut(registry).values_mut() {
                rebase(&mut record.path, old_root, new_root);
                for path in record
                    .symlinks
                    .iter_mut()
                    .chain(record.duplicates.iter_mut())
                {
                    rebase(path, old_root, new_root);
                }
            }
        }
    }

    /// Forget everything placed under `dir`: records whose primary path
    /// lies under it are removed and their UUIDs returned; alias lists of
    /// surviving records are pruned.
    pub fn purge_paths_under(&mut self, dir: &Path) -> Vec<Uuid> {
        let mut purged = Vec::new();
        for registry in RegistryKind::ALL {
            let doomed: Vec<Uuid> = self
                .registry(registry)
                .iter()
                .filter(|(_, record)| record.path.starts_with(dir))
                .map(|(uuid, _)| *uuid)
                .collect();
            for uuid in doomed {
                self.registry_mut(registry).remove(&uuid);
                purged.push(uuid);
            }
            for record in self.registry_mut(registry).values_mut() {
                record.symlinks.retain(|path| !path.starts_with(dir));
                record.duplicates.retain(|path| !path.starts_with(dir));
            }
        }
        purged
    }

    fn registry(&self, kind: RegistryKind) -> &BTreeMap<Uuid, DumpRecord> {
        match kind {
            RegistryKind::Calculations => &self.calculations,
            RegistryKind::Workflows => &self.workflows,
            RegistryKind::Data => &self.data,
            RegistryKind::Groups => &self.groups,
        }
    }

    fn registry_mut(&mut self, kind: RegistryKind) -> &mut BTreeMap<Uuid, DumpRecord> {
        match kind {
            RegistryKind::Calculations => &mut self.calculations,
            RegistryKind::Workflows => &mut self.workflows,
            RegistryKind::Data => &mut self.data,
            RegistryKind::Groups => &mut self.groups,
        }
    }

    fn check_disjoint(&self) -> DumpResult<()> {
        let mut seen: BTreeMap<Uuid, RegistryKind> = BTreeMap::new();
        for registry in RegistryKind::ALL {
            for uuid in self.registry(registry).keys() {
                if seen.insert(*uuid, registry).is_some() {
                    return Err(DumpError::CorruptTrackerState(format!(
                        "uuid {uuid} appears in more than one registry"
                    )));
                }
            }
        }
        Ok(())
    }

    fn relativized(&self, registry: &BTreeMap<Uuid, DumpRecord>) -> BTreeMap<Uuid, DumpRecord> {
        registry
            .iter()
            .map(|(uuid, record)| {
                let mut record = record.clone();
                relativize(&mut record.path, &self.root);
                for path in record
                    .symlinks
                    .iter_mut()
                    .chain(record.duplicates.iter_mut())
                {
                    relativize(path, &self.root);
                }
                (*uuid, record)
            })
            .collect()
    }
}

fn relativize(path: &mut PathBuf, root: &Path) {
    match path.strip_prefix(root) {
        Ok(relative) => *path = relative.to_path_buf(),
        // A path outside the root stays absolute; load leaves it alone too.
        Err(_) => warn!(path = %path.display(), "tracked path outside output root"),
    }
}

fn absolutize(record: &mut DumpRecord, root: &Path) {
    let anchor = |path: &mut PathBuf| {
        if path.is_relative() {
            *path = root.join(&path);
        }
    };
    anchor(&mut record.path);
    record.symlinks.iter_mut().for_each(anchor);
    record.duplicates.iter_mut().for_each(anchor);
}

fn rebase(path: &mut PathBuf, old_root: &Path, new_root: &Path) {
    if let Ok(suffix) = path.strip_prefix(old_root) {
        *path = new_root.join(suffix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn load_missing_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let tracker = DumpTracker::load(dir.path()).unwrap();
        assert!(tracker.last_dump_time.is_none());
        assert!(tracker.uuids(RegistryKind::Calculations).is_empty());
    }

    #[test]
    fn load_malformed_file_is_corrupt_state() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(TRACKER_FILE), "{not json").unwrap();
        let err = DumpTracker::load(dir.path()).unwrap_err();
        assert!(matches!(err, DumpError::CorruptTrackerState(_)));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut tracker = DumpTracker::new(dir.path());
        let mut record = DumpRecord::new(dir.path().join("calculations/scf-1"));
        record.dir_size = Some(42);
        tracker
            .add(RegistryKind::Calculations, uuid(1), record)
            .unwrap();
        tracker.last_dump_time = Some(Utc::now());
        tracker.previous_mapping.insert(uuid(9), uuid(1));
        tracker.save().unwrap();

        let loaded = DumpTracker::load(dir.path()).unwrap();
        let restored = loaded
            .get_record(RegistryKind::Calculations, &uuid(1))
            .unwrap();
        assert_eq!(restored.path, dir.path().join("calculations/scf-1"));
        assert_eq!(restored.dir_size, Some(42));
        assert_eq!(loaded.last_dump_time, tracker.last_dump_time);
        assert!(loaded.previous_mapping.is_grouped(&uuid(1)));
    }

    #[test]
    fn saved_paths_are_relative_to_root() {
        let dir = TempDir::new().unwrap();
        let mut tracker = DumpTracker::new(dir.path());
        tracker
            .add(
                RegistryKind::Data,
                uuid(1),
                DumpRecord::new(dir.path().join("data/point-1")),
            )
            .unwrap();
        tracker.save().unwrap();

        let raw = fs::read_to_string(dir.path().join(TRACKER_FILE)).unwrap();
        let document: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let stored = document["data"][uuid(1).to_string()]["path"]
            .as_str()
            .unwrap();
        assert_eq!(stored, "data/point-1");
    }

    #[test]
    fn uuid_in_two_registries_fails_load() {
        let dir = TempDir::new().unwrap();
        let id = uuid(1).to_string();
        let raw = format!(
            r#"{{"calculations": {{"{id}": {{"path": "a"}}}}, "data": {{"{id}": {{"path": "b"}}}}}}"#
        );
        fs::write(dir.path().join(TRACKER_FILE), raw).unwrap();
        let err = DumpTracker::load(dir.path()).unwrap_err();
        assert!(matches!(err, DumpError::CorruptTrackerState(_)));
    }

    #[test]
    fn add_rejects_uuid_tracked_elsewhere() {
        let dir = TempDir::new().unwrap();
        let mut tracker = DumpTracker::new(dir.path());
        tracker
            .add(RegistryKind::Workflows, uuid(1), DumpRecord::new("a".into()))
            .unwrap();
        let err = tracker
            .add(RegistryKind::Data, uuid(1), DumpRecord::new("b".into()))
            .unwrap_err();
        assert!(matches!(err, DumpError::CorruptTrackerState(_)));
    }

    #[test]
    fn rebase_paths_moves_group_subtree() {
        let mut tracker = DumpTracker::new("/dump");
        let mut record = DumpRecord::new(PathBuf::from("/dump/groups/old/calculations/scf-1"));
        record
            .symlinks
            .push(PathBuf::from("/dump/groups/old/calculations/alias-1"));
        tracker
            .add(RegistryKind::Calculations, uuid(1), record)
            .unwrap();
        tracker
            .add(
                RegistryKind::Data,
                uuid(2),
                DumpRecord::new(PathBuf::from("/dump/ungrouped/data/point-2")),
            )
            .unwrap();

        tracker.rebase_paths(
            Path::new("/dump/groups/old"),
            Path::new("/dump/groups/new"),
        );
        assert_eq!(
            tracker.get_record(RegistryKind::Calculations, &uuid(1)).unwrap().path,
            PathBuf::from("/dump/groups/new/calculations/scf-1")
        );
        assert_eq!(
            tracker.get_record(RegistryKind::Calculations, &uuid(1)).unwrap().symlinks[0],
            PathBuf::from("/dump/groups/new/calculations/alias-1")
        );
        assert_eq!(
            tracker.get_record(RegistryKind::Data, &uuid(2)).unwrap().path,
            PathBuf::from("/dump/ungrouped/data/point-2")
        );
    }

    #[test]
    fn purge_removes_primaries_and_prunes_aliases() {
        let mut tracker = DumpTracker::new("/dump");
        tracker
            .add(
                RegistryKind::Calculations,
                uuid(1),
                DumpRecord::new(PathBuf::from("/dump/groups/gone/calculations/scf-1")),
            )
            .unwrap();
        let mut survivor = DumpRecord::new(PathBuf::from("/dump/groups/kept/calculations/scf-2"));
        survivor
            .duplicates
            .push(PathBuf::from("/dump/groups/gone/calculations/scf-2"));
        tracker
            .add(RegistryKind::Calculations, uuid(2), survivor)
            .unwrap();

        let purged = tracker.purge_paths_under(Path::new("/dump/groups/gone"));
        assert_eq!(purged, vec![uuid(1)]);
        assert!(!tracker.contains(&uuid(1)));
        let kept = tracker
            .get_record(RegistryKind::Calculations, &uuid(2))
            .unwrap();
        assert!(kept.duplicates.is_empty());
    }

    #[test]
    fn get_reports_registry_of_record() {
        let mut tracker = DumpTracker::new("/dump");
        tracker
            .add(RegistryKind::Groups, uuid(5), DumpRecord::new("g".into()))
            .unwrap();
        let (registry, _) = tracker.get(&uuid(5)).unwrap();
        assert_eq!(registry, RegistryKind::Groups);
        assert!(tracker.get(&uuid(6)).is_none());
    }
}
