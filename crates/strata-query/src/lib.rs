//! The query collaborator contract consumed by the dump engine.
//!
//! The entity/relational layer itself is out of scope for Strata; this
//! crate defines the [`QuerySource`] trait it must provide, the
//! bidirectional [`GroupNodeMapping`] with its change-set diff, and an
//! in-memory implementation ([`MemoryQuerySource`]) loadable from a JSON
//! profile for tests and the CLI.

pub mod error;
pub mod mapping;
pub mod memory;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{QueryError, QueryResult};
pub use mapping::{
    GroupChanges, GroupModification, GroupNodeMapping, NodeMembershipChange,
};
pub use memory::{MemoryQuerySource, Profile};
pub use traits::{EntityFilter, QuerySource};
