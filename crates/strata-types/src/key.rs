use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Opaque identifier for a blob held by a store backend.
///
/// A backend mints keys on `put` -- a content hash for content-addressed
/// backends, a random token otherwise. Callers must treat the key as
/// opaque: it is unique, immutable once issued, and never reused after
/// deletion.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Wrap a backend-issued key string.
    ///
    /// Fails if the string is empty; an empty key can never identify a
    /// stored blob.
    pub fn new(key: impl Into<String>) -> Result<Self, TypeError> {
        let key = key.into();
        if key.is_empty() {
            return Err(TypeError::InvalidKey("empty key".to_string()));
        }
        Ok(Self(key))
    }

    /// The raw key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short representation (first 8 characters) for log output.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({})", self.short())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_empty() {
        assert!(ObjectKey::new("").is_err());
    }

    #[test]
    fn display_is_full_key() {
        let key = ObjectKey::new("abcdef0123456789").unwrap();
        assert_eq!(format!("{key}"), "abcdef0123456789");
    }

    #[test]
    fn short_truncates_long_keys() {
        let key = ObjectKey::new("abcdef0123456789").unwrap();
        assert_eq!(key.short(), "abcdef01");
    }

    #[test]
    fn short_of_short_key_is_whole_key() {
        let key = ObjectKey::new("abc").unwrap();
        assert_eq!(key.short(), "abc");
    }

    #[test]
    fn serde_is_transparent() {
        let key = ObjectKey::new("deadbeef").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"deadbeef\"");
        let parsed: ObjectKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = ObjectKey::new("aaa").unwrap();
        let b = ObjectKey::new("bbb").unwrap();
        assert!(a < b);
    }
}
