//! The incremental dump engine: materializes entity state and group
//! structure to a filesystem tree across repeated runs.
//!
//! A run reconciles three sources of truth: the persisted [`DumpTracker`]
//! (what earlier runs wrote), the live query layer (what exists now), and
//! the filesystem itself. The [`ChangeDetector`] computes what must
//! happen; the executors inside [`DumpEngine`] act on it -- deletions
//! first, then group renames, then content writes -- and the tracker is
//! saved exactly once, at the end of a successful pass.
//!
//! # Design Rules
//!
//! 1. Detection is read-only; nothing is committed until the engine acts.
//! 2. Every directory the engine creates carries a safeguard marker file;
//!    automatic deletion refuses directories without it.
//! 3. An entity has exactly one primary path for its whole tracked life.
//!    Additional placements are symlinks or duplicates, and membership
//!    removal may only ever delete those.
//! 4. `DumpTracker::save` is the single commit point: the on-disk tracker
//!    is either fully updated or untouched by a run.

pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod execute;
pub mod paths;
pub mod tracker;

// Re-export primary types at crate root for ergonomic imports.
pub use config::{DumpConfig, FailurePolicy};
pub use detect::{ChangeDetector, DumpChanges, DumpScope, EntityChanges, GroupRename};
pub use engine::{DumpEngine, DumpReport};
pub use error::{DumpError, DumpResult};
pub use execute::{determine_action, DumpAction, DumpFailure, SAFEGUARD_FILE};
pub use paths::PathPolicy;
pub use tracker::{DumpRecord, DumpTracker, RegistryKind, TRACKER_FILE};
