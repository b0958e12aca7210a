use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::RwLock;

use strata_types::ObjectKey;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::traits::StoreBackend;

/// In-memory, token-keyed scratch backend.
///
/// Every `put` mints a fresh UUID key, so identical bytes are stored twice
/// -- no deduplication. This is the backing store for unstored entities:
/// contents are promoted into a permanent backend on store and the sandbox
/// is dropped.
pub struct SandboxBackend {
    objects: RwLock<HashMap<ObjectKey, Vec<u8>>>,
}

impl SandboxBackend {
    /// Create a new empty sandbox.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the sandbox holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }
}

impl Default for SandboxBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBackend for SandboxBackend {
    fn put(&self, reader: &mut dyn Read) -> StoreResult<ObjectKey> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        let key = ObjectKey::new(Uuid::new_v4().simple().to_string())
            .expect("uuid is never empty");
        let mut map = self.objects.write().expect("lock poisoned");
        map.insert(key.clone(), data);
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
        // Keys are random tokens; the digest must come from the bytes.
        let map = self.objects.read().expect("lock poisoned");
        match map.get(key) {
            Some(data) => Ok(blake3::hash(data).to_hex().to_string()),
            None => Err(StoreError::NotFound(key.clone())),
        }
    }
}

impl std::fmt::Debug for SandboxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxBackend")
            .field("object_count", &self.len())
            .finish()
    }
}
