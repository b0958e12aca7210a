//! Per-entity compatibility layer binding an entity's lifecycle to a
//! repository.
//!
//! An unstored entity gets a fresh mutable repository over a private
//! sandbox backend; a stored entity gets a frozen repository
//! reconstructed from the permanent backend plus the entity's persisted
//! serialized-tree metadata. The transition happens exactly once, in
//! [`EntityRepository::store`].

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use strata_store::{SandboxBackend, StoreBackend};
use tracing::debug;

use crate::error::{RepoError, RepoResult};
use crate::repository::Repository;

/// Binds one entity (stored flag plus persisted tree metadata) to a
/// lazily constructed [`Repository`].
///
/// The adapter never re-persists metadata implicitly: after mutating an
/// unstored entity, callers obtain the updated tree either explicitly via
/// [`serialize`](EntityRepository::serialize) or atomically from
/// [`store`](EntityRepository::store).
pub struct EntityRepository {
    stored: bool,
    backend: Arc<dyn StoreBackend>,
    metadata: Value,
    repository: Option<Repository>,
}

impl EntityRepository {
    /// Adapter for a new, unstored entity: a mutable repository over a
    /// private sandbox backend.
    pub fn for_unstored() -> Self {
        Self {
            stored: false,
            backend: Arc::new(SandboxBackend::new()),
            metadata: Value::Null,
            repository: None,
        }
    }

    /// Adapter for a stored entity: a frozen repository over the permanent
    /// backend, seeded from the entity's persisted serialized tree.
    ///
    /// `Null` metadata means the entity has no file content.
    pub fn for_stored(permanent: Arc<dyn StoreBackend>, metadata: Value) -> Self {
        Self {
            stored: true,
            backend: permanent,
            metadata,
            repository: None,
        }
    }

    /// Returns `true` once the entity (and thus its repository) is stored.
    pub fn is_stored(&self) -> bool {
        self.stored
    }

    /// Fails with `ModificationNotAllowed` if the entity is stored.
    pub fn check_mutability(&self) -> RepoResult<()> {
        if self.stored {
            return Err(RepoError::ModificationNotAllowed);
        }
        Ok(())
    }

    /// The bound repository, constructed on first access.
    pub fn repository(&mut self) -> RepoResult<&Repository> {
        self.ensure_repository()?;
        Ok(self.repository.as_ref().expect("ensured above"))
    }

    fn ensure_repository(&mut self) -> RepoResult<()> {
        if self.repository.is_some() {
            return Ok(());
        }
        let repository = if self.stored {
            let mut repository = if self.metadata.is_null() {
                Repository::new(Arc::clone(&self.backend))
            } else {
                Repository::from_serialized(Arc::clone(&self.backend), &self.metadata)?
            };
            repository.freeze();
            repository
        } else {
            Repository::new(Arc::clone(&self.backend))
        };
        self.repository = Some(repository);
        Ok(())
    }

    fn repository_mut(&mut self) -> RepoResult<&mut Repository> {
        self.check_mutability()?;
        self.ensure_repository()?;
        Ok(self.repository.as_mut().expect("ensured above"))
    }

    // ---------------------------------------------------------------
    // Mutators (unstored entities only)
    // ---------------------------------------------------------------

    /// Store a byte stream at `path` in the entity's repository.
    pub fn put_object_from_stream(
        &mut self,
        reader: &mut dyn Read,
        path: &str,
    ) -> RepoResult<()> {
        self.repository_mut()?.put_from_stream(reader, path)
    }

    /// Store a byte slice at `path` in the entity's repository.
    pub fn put_object_from_bytes(&mut self, bytes: &[u8], path: &str) -> RepoResult<()> {
        self.repository_mut()?.put_from_bytes(bytes, path)
    }

    /// Ingest a filesystem tree under `prefix`.
    pub fn put_object_from_tree(&mut self, source: &Path, prefix: &str) -> RepoResult<()> {
        self.repository_mut()?.put_from_dir(source, prefix)
    }

    /// Remove the file entry at `path`.
    pub fn delete_object(&mut self, path: &str) -> RepoResult<()> {
        self.repository_mut()?.delete(path)
    }

    /// Delete every referenced object and reset the tree.
    pub fn erase(&mut self) -> RepoResult<()> {
        self.repository_mut()?.erase()
    }

    // ---------------------------------------------------------------
    // Serialization and the store transition
    // ---------------------------------------------------------------

    /// The current serialized tree. Callers persist this into the entity's
    /// metadata field; the adapter never does so on its own.
    pub fn serialize(&mut self) -> RepoResult<Value> {
        Ok(self.repository()?.serialize())
    }

    /// Transition the entity to stored.
    ///
    /// Clones the sandbox contents into `permanent`, swaps the internal
    /// repository for the frozen permanent one, and returns the serialized
    /// tree for the caller to write into the entity's persisted metadata.
    pub fn store(&mut self, permanent: Arc<dyn StoreBackend>) -> RepoResult<Value> {
        self.check_mutability()?;
        self.ensure_repository()?;
        let sandbox = self.repository.take().expect("ensured above");

        let mut promoted = Repository::new(Arc::clone(&permanent));
        promoted.clone_from(&sandbox)?;
        let metadata = promoted.serialize();
        promoted.freeze();
        debug!("promoted sandbox repository to permanent backend");

        self.stored = true;
        self.backend = permanent;
        self.metadata = metadata.clone();
        self.repository = Some(promoted);
        Ok(metadata)
    }
}

impl std::fmt::Debug for EntityRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRepository")
            .field("stored", &self.stored)
            .field("constructed", &self.repository.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_store::MemoryBackend;

    #[test]
    fn unstored_adapter_accepts_writes() {
        let mut adapter = EntityRepository::for_unstored();
        adapter.put_object_from_bytes(b"draft", "notes/a.txt").unwrap();
        assert_eq!(
            adapter.repository().unwrap().get_bytes("notes/a.txt").unwrap(),
            b"draft"
        );
    }

    #[test]
    fn stored_adapter_rejects_all_mutators() {
        let permanent: Arc<dyn StoreBackend> = Arc::new(MemoryBackend::new());
        let mut adapter = EntityRepository::for_stored(permanent, Value::Null);
        assert!(matches!(
            adapter.put_object_from_bytes(b"x", "a"),
            Err(RepoError::ModificationNotAllowed)
        ));
        assert!(matches!(
            adapter.delete_object("a"),
            Err(RepoError::ModificationNotAllowed)
        ));
        assert!(matches!(
            adapter.erase(),
            Err(RepoError::ModificationNotAllowed)
        ));
    }

    #[test]
    fn store_promotes_sandbox_and_freezes() {
        let mut adapter = EntityRepository::for_unstored();
        adapter.put_object_from_bytes(b"hello", "a/b.txt").unwrap();

        let permanent: Arc<dyn StoreBackend> = Arc::new(MemoryBackend::new());
        let metadata = adapter.store(Arc::clone(&permanent)).unwrap();

        assert!(adapter.is_stored());
        assert!(metadata.get("o").is_some());
        // Content now readable through the permanent repository.
        assert_eq!(
            adapter.repository().unwrap().get_bytes("a/b.txt").unwrap(),
            b"hello"
        );
        // And further mutation is rejected.
        assert!(matches!(
            adapter.put_object_from_bytes(b"x", "c"),
            Err(RepoError::ModificationNotAllowed)
        ));
    }

    #[test]
    fn store_twice_is_rejected() {
        let mut adapter = EntityRepository::for_unstored();
        let permanent: Arc<dyn StoreBackend> = Arc::new(MemoryBackend::new());
        adapter.store(Arc::clone(&permanent)).unwrap();
        assert!(matches!(
            adapter.store(permanent),
            Err(RepoError::ModificationNotAllowed)
        ));
    }

    #[test]
    fn stored_adapter_rebuilds_from_metadata() {
        // Build and store an entity, then open a second adapter from the
        // persisted metadata alone.
        let mut first = EntityRepository::for_unstored();
        first.put_object_from_bytes(b"persisted", "data/file").unwrap();
        let permanent: Arc<dyn StoreBackend> = Arc::new(MemoryBackend::new());
        let metadata = first.store(Arc::clone(&permanent)).unwrap();

        let mut second = EntityRepository::for_stored(permanent, metadata);
        assert_eq!(
            second.repository().unwrap().get_bytes("data/file").unwrap(),
            b"persisted"
        );
        assert!(second.repository().unwrap().is_frozen());
    }

    #[test]
    fn serialize_reflects_unpersisted_mutations() {
        let mut adapter = EntityRepository::for_unstored();
        adapter.put_object_from_bytes(b"x", "one").unwrap();
        let before = adapter.serialize().unwrap();
        adapter.put_object_from_bytes(b"y", "two").unwrap();
        let after = adapter.serialize().unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn stored_adapter_with_null_metadata_is_empty() {
        let permanent: Arc<dyn StoreBackend> = Arc::new(MemoryBackend::new());
        let mut adapter = EntityRepository::for_stored(permanent, Value::Null);
        assert!(adapter.repository().unwrap().is_empty());
    }
}
