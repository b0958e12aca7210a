use std::io::Read;

use strata_types::ObjectKey;

use crate::error::StoreResult;

/// Flat key/value blob store.
///
/// All implementations must satisfy these invariants:
/// - `put` mints a fresh or deduplicated key; keys are never reused after
///   deletion.
/// - A content-addressed implementation returns the same key for identical
///   bytes; a token-keyed one returns a distinct key per `put`. Callers
///   must not depend on either behavior beyond what `content_hash` exposes.
/// - `content_hash` is stable across backends: the same bytes produce the
///   same digest whatever the key scheme.
/// - All I/O errors are propagated, never silently ignored.
pub trait StoreBackend: Send + Sync {
    /// Store the full contents of `reader` and return the key for it.
    fn put(&self, reader: &mut dyn Read) -> StoreResult<ObjectKey>;

    /// Check whether a key is present.
    fn has(&self, key: &ObjectKey) -> StoreResult<bool>;

    /// Open a stored object for reading.
    ///
    /// Returns `Err(NotFound)` if the key is absent.
    fn open(&self, key: &ObjectKey) -> StoreResult<Box<dyn Read + Send>>;

    /// Delete a stored object.
    ///
    /// Returns `Err(NotFound)` if the key is absent.
    fn delete(&self, key: &ObjectKey) -> StoreResult<()>;

    /// All keys currently present, sorted.
    fn list(&self) -> StoreResult<Vec<ObjectKey>>;

    /// Stable content digest for a stored object, independent of the key
    /// scheme.
    fn content_hash(&self, key: &ObjectKey) -> StoreResult<String>;

    /// Bulk existence check.
    ///
    /// Default implementation calls `has()` per key. Backends may override
    /// for fewer round-trips.
    fn has_many(&self, keys: &[ObjectKey]) -> StoreResult<Vec<bool>> {
        keys.iter().map(|key| self.has(key)).collect()
    }

    /// Convenience: store a byte slice.
    fn put_bytes(&self, bytes: &[u8]) -> StoreResult<ObjectKey> {
        let mut reader = bytes;
        self.put(&mut reader)
    }

    /// Convenience: read a stored object fully into memory.
    fn get_bytes(&self, key: &ObjectKey) -> StoreResult<Vec<u8>> {
        let mut reader = self.open(key)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}
