//! Object store backends for Strata.
//!
//! A backend is a flat key/value blob store behind the [`StoreBackend`]
//! trait: `put` a byte stream and get back an opaque [`ObjectKey`], then
//! `open`, `delete`, or `list` by key. The repository layer above never
//! learns which key scheme a backend uses.
//!
//! # Backends
//!
//! - [`MemoryBackend`] -- in-memory, content-addressed (BLAKE3 keys);
//!   identical bytes deduplicate to the same key.
//! - [`SandboxBackend`] -- in-memory, UUID-keyed, no deduplication; the
//!   scratch store for unstored entities.
//! - [`FsBackend`] -- content-addressed loose files on disk, one file per
//!   object, fanned out by key prefix.
//!
//! # Design Rules
//!
//! 1. Keys are opaque to callers and never reused after deletion.
//! 2. `content_hash` returns the same digest for the same bytes on every
//!    backend, whatever the key scheme.
//! 3. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod fs;
pub mod memory;
pub mod sandbox;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{StoreError, StoreResult};
pub use fs::FsBackend;
pub use memory::MemoryBackend;
pub use sandbox::SandboxBackend;
pub use traits::StoreBackend;
