use uuid::Uuid;

/// Errors from the dump engine.
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    /// The persisted tracker is unusable: malformed JSON or a UUID found
    /// in two registries. Fatal -- silently starting from an empty tracker
    /// would re-dump everything as new and mask data loss.
    #[error("corrupt tracker state: {0}")]
    CorruptTrackerState(String),

    /// The dump target references a group the query layer does not know.
    #[error("unknown group: {0}")]
    UnknownGroup(Uuid),

    /// The dump target references an entity the query layer does not know.
    #[error("unknown entity: {0}")]
    UnknownEntity(Uuid),

    /// Failure from the repository layer.
    #[error(transparent)]
    Repo(#[from] strata_repo::RepoError),

    /// Failure from the query collaborator; aborts the detection pass.
    #[error(transparent)]
    Query(#[from] strata_query::QueryError),

    /// The tracker document could not be encoded.
    #[error("tracker serialization failed: {0}")]
    Serialization(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for dump operations.
pub type DumpResult<T> = Result<T, DumpError>;
