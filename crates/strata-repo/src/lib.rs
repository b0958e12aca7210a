//! Virtual file repository: a hierarchical path space layered over a flat
//! object store backend.
//!
//! A [`Repository`] owns a [`FileNode`] tree mapping relative paths to
//! backend keys, plus a shared reference to one [`StoreBackend`]. The
//! backend is a flat global store (many repositories may share it); the
//! tree is what makes the contents of one entity look like a directory
//! hierarchy.
//!
//! # Layers
//!
//! - [`FileNode`] -- the flattened tree and its JSON serialization.
//! - [`Repository`] -- path-addressed operations (list/open/put/delete/
//!   walk/hash/clone/erase) with an immutability switch.
//! - [`EntityRepository`] -- binds one entity's lifecycle (unstored vs.
//!   stored) to a lazily constructed repository.
//!
//! # Design Rules
//!
//! 1. All paths are relative; absolute and parent-escaping paths are
//!    rejected at the boundary.
//! 2. Once frozen, every mutator fails with `ImmutableRepository` and the
//!    tree is left untouched. Immutability is enforced here, never
//!    delegated to the backend.
//! 3. `hash()` depends only on logical content (paths and content digests),
//!    never on the backend or its key scheme.

pub mod adapter;
pub mod error;
pub mod node;
pub mod repository;

// Re-export primary types at crate root for ergonomic imports.
pub use adapter::EntityRepository;
pub use error::{RepoError, RepoResult};
pub use node::{EntryKind, FileNode, DIRECTORY_MARKER, KEY_MARKER};
pub use repository::{Repository, Walk};
