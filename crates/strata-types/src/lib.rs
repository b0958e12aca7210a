//! Foundation types for Strata: backend object keys, entity kinds, and the
//! entity/group handles exchanged with the query layer.
//!
//! Everything here is a plain value type. Behavior (storage, repositories,
//! dumping) lives in the crates built on top.

pub mod entity;
pub mod error;
pub mod key;

// Re-export primary types at crate root for ergonomic imports.
pub use entity::{EntityInfo, EntityKind, GroupInfo};
pub use error::TypeError;
pub use key::ObjectKey;
