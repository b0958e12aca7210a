use strata_store::StoreError;

/// Errors from repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// The path is absolute, escapes the root, or contains an empty or
    /// reserved segment.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// No entry exists at the given path.
    #[error("no object exists at path: {0}")]
    NotFound(String),

    /// The path names a directory where a file was required.
    #[error("path is a directory: {0}")]
    IsADirectory(String),

    /// The path names a file where a directory was required.
    #[error("path is not a directory: {0}")]
    NotADirectory(String),

    /// An entry already occupies the given path.
    #[error("an entry already exists at path: {0}")]
    AlreadyExists(String),

    /// Mutation attempted on a frozen repository.
    #[error("the repository is immutable and cannot be modified")]
    ImmutableRepository,

    /// Mutation attempted through the adapter of a stored entity.
    #[error("the entity is stored; its repository can no longer be modified")]
    ModificationNotAllowed,

    /// The serialized tree is malformed.
    #[error("malformed serialized tree: {0}")]
    Serialization(String),

    /// Error from the underlying store backend.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// I/O error while ingesting from the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;
