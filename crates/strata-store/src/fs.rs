use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use strata_types::ObjectKey;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::StoreBackend;

/// Content-addressed loose-file backend.
///
/// One file per object under `<root>/<aa>/<rest-of-digest>`, where the key
/// is the BLAKE3 hex digest of the content and `aa` its first two
/// characters. Writes go through a temp file in the root and are persisted
/// with a rename, so a crash never leaves a half-written object at a final
/// path.
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Open (creating if needed) a loose-file store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &ObjectKey) -> StoreResult<PathBuf> {
        let raw = key.as_str();
        if raw.len() <= 2 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StoreError::InvalidKey(raw.to_string()));
        }
        Ok(self.root.join(&raw[..2]).join(&raw[2..]))
    }
}

impl StoreBackend for FsBackend {
    fn put(&self, reader: &mut dyn Read) -> StoreResult<ObjectKey> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        let digest = blake3::hash(&data).to_hex().to_string();
        let key = ObjectKey::new(digest).expect("blake3 digest is never empty");

        let path = self.key_path(&key)?;
        if path.exists() {
            // Dedup: identical content is already on disk.
            return Ok(key);
        }

        let parent = path.parent().expect("key path always has a parent");
        fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        std::io::Write::write_all(&mut tmp, &data)?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        debug!(key = key.short(), "stored loose object");
        Ok(key)
    }

    fn has(&self, key: &ObjectKey) -> StoreResult<bool> {
        Ok(self.key_path(key)?.exists())
    }

    fn open(&self, key: &ObjectKey) -> StoreResult<Box<dyn Read + Send>> {
        let path = self.key_path(key)?;
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.clone()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.clone()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn list(&self) -> StoreResult<Vec<ObjectKey>> {
        let mut keys = Vec::new();
        for fanout in fs::read_dir(&self.root)? {
            let fanout = fanout?;
            if !fanout.file_type()?.is_dir() {
                continue;
            }
            let prefix = fanout.file_name().to_string_lossy().into_owned();
            for entry in fs::read_dir(fanout.path())? {
                let entry = entry?;
                let rest = entry.file_name().to_string_lossy().into_owned();
                if let Ok(key) = ObjectKey::new(format!("{prefix}{rest}")) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn content_hash(&self, key: &ObjectKey) -> StoreResult<String> {
        // The key already is the content digest; only confirm presence.
        if self.has(key)? {
            Ok(key.as_str().to_string())
        } else {
            Err(StoreError::NotFound(key.clone()))
        }
    }
}

impl std::fmt::Debug for FsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsBackend").field("root", &self.root).finish()
    }
}
