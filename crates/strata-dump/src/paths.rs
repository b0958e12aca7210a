//! Deterministic, collision-free dump paths.
//!
//! Pure functions over the configuration and the output root; nothing
//! here touches the filesystem. Collisions are prevented by construction:
//! entity directory names always embed the unique pk, so no uniquify
//! suffix scheme exists anywhere.

use std::path::{Path, PathBuf};

use strata_types::{EntityInfo, GroupInfo};

use crate::config::DumpConfig;

/// Computes every output path for a dump pass.
#[derive(Clone, Debug)]
pub struct PathPolicy {
    config: DumpConfig,
    base: PathBuf,
}

impl PathPolicy {
    /// Policy for the given configuration and output root.
    pub fn new(config: DumpConfig, base: impl Into<PathBuf>) -> Self {
        Self {
            config,
            base: base.into(),
        }
    }

    /// The output root.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// The directory holding all group content roots.
    pub fn groups_root(&self) -> PathBuf {
        self.base.join("groups")
    }

    /// The content root for a group.
    ///
    /// Flat layout puts everything at the output root. Otherwise a
    /// top-level group gets `<root>/groups/<label>`, except when the group
    /// is the sole target of the run, in which case the root itself is
    /// used (avoids `dump/label/label/...` redundancy). A `parent` path,
    /// when given, nests a sub-grouping beneath it.
    pub fn group_content_root(
        &self,
        group: &GroupInfo,
        parent: Option<&Path>,
        sole_target: bool,
    ) -> PathBuf {
        if !self.config.organize_by_group {
            return self.base.clone();
        }
        if let Some(parent) = parent {
            return parent.join(group.directory_name());
        }
        if sole_target {
            return self.base.clone();
        }
        self.groups_root().join(group.directory_name())
    }

    /// The directory for one entity under a content root:
    /// `<content-root>/<type-folder>/<name>-<pk>`.
    pub fn node_path(&self, entity: &EntityInfo, content_root: &Path) -> PathBuf {
        content_root
            .join(entity.kind.type_folder())
            .join(entity.directory_name())
    }

    /// The content root for entities without any group membership.
    pub fn ungrouped_root(&self) -> PathBuf {
        if self.config.organize_by_group {
            self.base.join("ungrouped")
        } else {
            self.base.clone()
        }
    }
}
