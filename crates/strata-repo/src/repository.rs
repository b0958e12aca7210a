//! The [`Repository`]: path-addressed operations over one file-node tree
//! and one shared store backend.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use strata_store::{StoreBackend, StoreError};
use strata_types::ObjectKey;
use tracing::debug;

use crate::error::{RepoError, RepoResult};
use crate::node::{EntryKind, FileNode};

/// A virtual hierarchy of files over a flat object store.
///
/// The repository exclusively owns its tree; the backend is shared (it is
/// a flat global store keyed by hash or token, not a per-repository
/// folder). Created empty for a new entity or reconstructed from a
/// serialized tree for an existing one. Once [`freeze`](Repository::freeze)
/// is called every mutator fails with
/// [`ImmutableRepository`](RepoError::ImmutableRepository).
pub struct Repository {
    backend: Arc<dyn StoreBackend>,
    root: FileNode,
    frozen: bool,
}

impl Repository {
    /// Create an empty, mutable repository over `backend`.
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            root: FileNode::empty_directory(),
            frozen: false,
        }
    }

    /// Reconstruct a repository from a serialized tree.
    ///
    /// The value must encode a directory at the root. The repository is
    /// returned mutable; call [`freeze`](Repository::freeze) for the
    /// read-only variant.
    pub fn from_serialized(
        backend: Arc<dyn StoreBackend>,
        value: &Value,
    ) -> RepoResult<Self> {
        let root = FileNode::from_value(value)?;
        if !root.is_directory() {
            return Err(RepoError::Serialization(
                "serialized tree root must be a directory".to_string(),
            ));
        }
        Ok(Self {
            backend,
            root,
            frozen: false,
        })
    }

    /// Make every subsequent mutation fail with `ImmutableRepository`.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Returns `true` if the repository rejects mutation.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// The shared backend this repository reads from and writes to.
    pub fn backend(&self) -> Arc<dyn StoreBackend> {
        Arc::clone(&self.backend)
    }

    /// Returns `true` if the tree has no entries.
    pub fn is_empty(&self) -> bool {
        matches!(&self.root, FileNode::Directory(children) if children.is_empty())
    }

    /// Returns `true` if an entry (file or directory) exists at `path`.
    pub fn contains(&self, path: &str) -> RepoResult<bool> {
        let parts = split_path(path)?;
        Ok(node_at(&self.root, &parts).is_some())
    }

    fn check_mutable(&self) -> RepoResult<()> {
        if self.frozen {
            return Err(RepoError::ImmutableRepository);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Read operations
    // ---------------------------------------------------------------

    /// List the entries of the directory at `path`, sorted by name.
    pub fn list_objects(&self, path: &str) -> RepoResult<Vec<(String, EntryKind)>> {
        let parts = split_path(path)?;
        let node = node_at(&self.root, &parts)
            .ok_or_else(|| RepoError::NotFound(path.to_string()))?;
        match node {
            FileNode::Directory(children) => Ok(children
                .iter()
                .map(|(name, child)| (name.clone(), child.kind()))
                .collect()),
            FileNode::File(_) => Err(RepoError::NotADirectory(path.to_string())),
        }
    }

    /// Open the file at `path` as a byte stream.
    pub fn open(&self, path: &str) -> RepoResult<Box<dyn Read + Send>> {
        let parts = split_path(path)?;
        let node = node_at(&self.root, &parts)
            .ok_or_else(|| RepoError::NotFound(path.to_string()))?;
        match node {
            FileNode::File(key) => Ok(self.backend.open(key)?),
            FileNode::Directory(_) => Err(RepoError::IsADirectory(path.to_string())),
        }
    }

    /// Read the file at `path` fully into memory.
    pub fn get_bytes(&self, path: &str) -> RepoResult<Vec<u8>> {
        let mut reader = self.open(path)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Walk `path` and every descendant.
    ///
    /// Yields `(repository-relative path, key)` pairs, the starting entry
    /// first, directories with `None`. The order is depth-first over
    /// sorted names and stable per call; calling again restarts.
    pub fn walk(&self, path: &str) -> RepoResult<Walk<'_>> {
        let parts = split_path(path)?;
        let node = node_at(&self.root, &parts)
            .ok_or_else(|| RepoError::NotFound(path.to_string()))?;
        Ok(Walk {
            stack: vec![(path.to_string(), node)],
        })
    }

    /// Deterministic digest of the repository's logical content.
    ///
    /// Computed over the sorted `(path, content-digest-or-null)` pairs, so
    /// two repositories with the same paths and bytes hash identically
    /// even when their backends use different key schemes.
    pub fn hash(&self) -> RepoResult<String> {
        let mut pairs = Vec::new();
        for (path, key) in self.walk("")? {
            if path.is_empty() {
                continue;
            }
            let digest = match key {
                Some(key) => Some(self.backend.content_hash(&key)?),
                None => None,
            };
            pairs.push((path, digest));
        }
        pairs.sort();

        let mut hasher = blake3::Hasher::new();
        for (path, digest) in &pairs {
            hasher.update(path.as_bytes());
            hasher.update(&[0]);
            hasher.update(digest.as_deref().unwrap_or("null").as_bytes());
            hasher.update(&[0]);
        }
        Ok(hasher.finalize().to_hex().to_string())
    }

    /// Encode the tree as a serialized-tree JSON value.
    pub fn serialize(&self) -> Value {
        self.root.to_value()
    }

    // ---------------------------------------------------------------
    // Mutating operations
    // ---------------------------------------------------------------

    /// Store the contents of `reader` at `path`.
    ///
    /// Intermediate parent directories are created. Fails with
    /// `AlreadyExists` if any entry occupies the exact path, and with
    /// `NotADirectory` if a parent prefix is a file. The path is validated
    /// before the backend write, so a rejected call leaves no orphan
    /// object behind.
    pub fn put_from_stream(
        &mut self,
        reader: &mut dyn Read,
        path: &str,
    ) -> RepoResult<()> {
        self.check_mutable()?;
        let parts = split_path(path)?;
        if parts.is_empty() {
            return Err(RepoError::InvalidPath("empty path".to_string()));
        }
        check_insertable(&self.root, &parts, path)?;

        let key = self.backend.put(reader)?;
        let (name, parents) = parts.split_last().expect("parts is non-empty");
        let dir = ensure_dir(&mut self.root, parents)?;
        dir.insert(name.clone(), FileNode::File(key));
        Ok(())
    }

    /// Store a byte slice at `path`.
    pub fn put_from_bytes(&mut self, bytes: &[u8], path: &str) -> RepoResult<()> {
        let mut reader = bytes;
        self.put_from_stream(&mut reader, path)
    }

    /// Ingest a filesystem directory tree under `prefix` (or at the root
    /// when `prefix` is empty). Empty directories are preserved.
    pub fn put_from_dir(&mut self, source: &Path, prefix: &str) -> RepoResult<()> {
        self.check_mutable()?;
        if !prefix.is_empty() {
            // Validate the prefix up front.
            split_path(prefix)?;
        }
        for entry in walkdir::WalkDir::new(source).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                RepoError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::other("walkdir loop")
                }))
            })?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .expect("walkdir yields descendants of source");
            let mut segments: Vec<String> = Vec::new();
            if !prefix.is_empty() {
                segments.extend(prefix.split('/').map(str::to_string));
            }
            for component in relative.components() {
                segments.push(component.as_os_str().to_string_lossy().into_owned());
            }
            let repo_path = segments.join("/");
            if entry.file_type().is_dir() {
                let parts = split_path(&repo_path)?;
                ensure_dir(&mut self.root, &parts)?;
            } else {
                let mut file = std::fs::File::open(entry.path())?;
                self.put_from_stream(&mut file, &repo_path)?;
            }
        }
        Ok(())
    }

    /// Remove the file entry at `path`.
    ///
    /// Only the tree entry is removed; the backend object stays, since a
    /// deduplicating backend may reference it from other paths or
    /// repositories.
    pub fn delete(&mut self, path: &str) -> RepoResult<()> {
        self.check_mutable()?;
        let parts = split_path(path)?;
        let Some((name, parents)) = parts.split_last() else {
            return Err(RepoError::InvalidPath("empty path".to_string()));
        };
        let children = match node_at_mut(&mut self.root, parents) {
            Some(FileNode::Directory(children)) => children,
            _ => return Err(RepoError::NotFound(path.to_string())),
        };
        match children.get(name) {
            Some(FileNode::File(_)) => {
                children.remove(name);
                Ok(())
            }
            Some(FileNode::Directory(_)) => {
                Err(RepoError::IsADirectory(path.to_string()))
            }
            None => Err(RepoError::NotFound(path.to_string())),
        }
    }

    /// Remove the directory entry at `path` and all its descendants.
    pub fn delete_tree(&mut self, path: &str) -> RepoResult<()> {
        self.check_mutable()?;
        let parts = split_path(path)?;
        let Some((name, parents)) = parts.split_last() else {
            return Err(RepoError::InvalidPath(
                "cannot delete the root; use erase".to_string(),
            ));
        };
        let children = match node_at_mut(&mut self.root, parents) {
            Some(FileNode::Directory(children)) => children,
            _ => return Err(RepoError::NotFound(path.to_string())),
        };
        match children.get(name) {
            Some(FileNode::Directory(_)) => {
                children.remove(name);
                Ok(())
            }
            Some(FileNode::File(_)) => {
                Err(RepoError::NotADirectory(path.to_string()))
            }
            None => Err(RepoError::NotFound(path.to_string())),
        }
    }

    /// Replace this repository's contents with a copy of `source`.
    ///
    /// Every file's bytes are streamed out of `source`'s backend into this
    /// repository's backend; used for promoting a sandbox repository to
    /// permanent storage.
    pub fn clone_from(&mut self, source: &Repository) -> RepoResult<()> {
        self.check_mutable()?;
        let mut root = FileNode::empty_directory();
        for (path, key) in source.walk("")? {
            if path.is_empty() {
                continue;
            }
            let parts = split_path(&path)?;
            match key {
                Some(key) => {
                    let mut reader = source.backend.open(&key)?;
                    let new_key = self.backend.put(&mut reader)?;
                    let (name, parents) =
                        parts.split_last().expect("walk paths are non-empty");
                    let dir = ensure_dir(&mut root, parents)?;
                    dir.insert(name.clone(), FileNode::File(new_key));
                }
                None => {
                    ensure_dir(&mut root, &parts)?;
                }
            }
        }
        self.root = root;
        Ok(())
    }

    /// Delete every object this tree references, then reset the tree.
    ///
    /// Does not touch objects the tree does not enumerate: the backend is
    /// shared and other repositories may be using it. A key already absent
    /// from the backend is skipped, since deduplicated trees can reference
    /// one object from several paths.
    pub fn erase(&mut self) -> RepoResult<()> {
        self.check_mutable()?;
        let mut keys = BTreeSet::new();
        for (_, key) in self.walk("")? {
            if let Some(key) = key {
                keys.insert(key);
            }
        }
        for key in keys {
            match self.backend.delete(&key) {
                Ok(()) => {}
                Err(StoreError::NotFound(_)) => {
                    debug!(key = key.short(), "object already absent on erase");
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.root = FileNode::empty_directory();
        Ok(())
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("frozen", &self.frozen)
            .finish()
    }
}

/// Depth-first iterator over a subtree; see [`Repository::walk`].
pub struct Walk<'a> {
    stack: Vec<(String, &'a FileNode)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (String, Option<ObjectKey>);

    fn next(&mut self) -> Option<Self::Item> {
        let (path, node) = self.stack.pop()?;
        let key = match node {
            FileNode::File(key) => Some(key.clone()),
            FileNode::Directory(children) => {
                // Reverse so the pop order is sorted by name.
                for (name, child) in children.iter().rev() {
                    let child_path = if path.is_empty() {
                        name.clone()
                    } else {
                        format!("{path}/{name}")
                    };
                    self.stack.push((child_path, child));
                }
                None
            }
        };
        Some((path, key))
    }
}

// ---------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------

/// Split a relative path into validated segments. The empty path denotes
/// the root.
fn split_path(path: &str) -> RepoResult<Vec<String>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    if path.starts_with('/') {
        return Err(RepoError::InvalidPath(format!(
            "absolute path not allowed: {path}"
        )));
    }
    let mut parts = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" => {
                return Err(RepoError::InvalidPath(format!(
                    "empty segment in path: {path}"
                )))
            }
            "." | ".." => {
                return Err(RepoError::InvalidPath(format!(
                    "path may not traverse: {path}"
                )))
            }
            _ => parts.push(segment.to_string()),
        }
    }
    Ok(parts)
}

fn node_at<'a>(root: &'a FileNode, parts: &[String]) -> Option<&'a FileNode> {
    let mut current = root;
    for part in parts {
        match current {
            FileNode::Directory(children) => current = children.get(part)?,
            FileNode::File(_) => return None,
        }
    }
    Some(current)
}

fn node_at_mut<'a>(
    root: &'a mut FileNode,
    parts: &[String],
) -> Option<&'a mut FileNode> {
    let mut current = root;
    for part in parts {
        match current {
            FileNode::Directory(children) => current = children.get_mut(part)?,
            FileNode::File(_) => return None,
        }
    }
    Some(current)
}

/// Verify that a file could be inserted at `parts` without touching the
/// tree: the exact path must be free and no parent prefix may be a file.
fn check_insertable(root: &FileNode, parts: &[String], path: &str) -> RepoResult<()> {
    let mut current = root;
    for (i, part) in parts.iter().enumerate() {
        let children = match current {
            FileNode::Directory(children) => children,
            FileNode::File(_) => {
                return Err(RepoError::NotADirectory(parts[..i].join("/")))
            }
        };
        match children.get(part) {
            Some(node) => {
                if i == parts.len() - 1 {
                    return Err(RepoError::AlreadyExists(path.to_string()));
                }
                current = node;
            }
            // Everything below here would be freshly created.
            None => return Ok(()),
        }
    }
    Ok(())
}

/// Create (or find) the directory at `parts`, building intermediate
/// directories as needed.
fn ensure_dir<'a>(
    root: &'a mut FileNode,
    parts: &[String],
) -> RepoResult<&'a mut BTreeMap<String, FileNode>> {
    let mut current = root;
    for (i, part) in parts.iter().enumerate() {
        let children = match current {
            FileNode::Directory(children) => children,
            FileNode::File(_) => {
                return Err(RepoError::NotADirectory(parts[..i].join("/")))
            }
        };
        current = children
            .entry(part.clone())
            .or_insert_with(FileNode::empty_directory);
    }
    match current {
        FileNode::Directory(children) => Ok(children),
        FileNode::File(_) => Err(RepoError::NotADirectory(parts.join("/"))),
    }
}
