use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::RwLock;

use strata_types::ObjectKey;

use crate::error::{StoreError, StoreResult};
use crate::traits::StoreBackend;

/// In-memory, content-addressed backend.
///
/// Keys are the BLAKE3 hex digest of the content, so identical bytes
/// deduplicate by construction. Intended for tests and embedding. All
/// objects are held behind a `RwLock`.
pub struct MemoryBackend {
    objects: RwLock<HashMap<ObjectKey, Vec<u8>>>,
}

impl MemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the backend holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored objects.
    pub fn total_bytes(&self) -> u64 {
        self.objects
            .read()
            .expect("lock poisoned")
            .values()
            .map(|data| data.len() as u64)
            .sum()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBackend for MemoryBackend {
    fn put(&self, reader: &mut dyn Read) -> StoreResult<ObjectKey> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        let digest = blake3::hash(&data).to_hex().to_string();
        let key = ObjectKey::new(digest).expect("blake3 digest is never empty");
        let mut map = self.objects.write().expect("lock poisoned");
        // Idempotent: identical content always maps to the same key.
        map.entry(key.clone()).or_insert(data);
        Ok(key)
    }

    fn has(&self, key: &ObjectKey) -> StoreResult<bool> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.contains_key(key))
    }

    fn open(&self, key: &ObjectKey) -> StoreResult<Box<dyn Read + Send>> {
        let map = self.objects.read().expect("lock poisoned");
        match map.get(key) {
            Some(data) => Ok(Box::new(Cursor::new(data.clone()))),
            None => Err(StoreError::NotFound(key.clone())),
        }
    }

    fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        let mut map = self.objects.write().expect("lock poisoned");
        match map.remove(key) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(key.clone())),
        }
    }

    fn list(&self) -> StoreResult<Vec<ObjectKey>> {
        let map = self.objects.read().expect("lock poisoned");
        let mut keys: Vec<ObjectKey> = map.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn content_hash(&self, key: &ObjectKey) -> StoreResult<String> {
        // The key already is the content digest; only confirm presence.
        let map = self.objects.read().expect("lock poisoned");
        if map.contains_key(key) {
            Ok(key.as_str().to_string())
        } else {
            Err(StoreError::NotFound(key.clone()))
        }
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("object_count", &self.len())
            .finish()
    }
}
