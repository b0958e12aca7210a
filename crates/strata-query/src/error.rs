use uuid::Uuid;

/// Errors from the query collaborator.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The referenced group does not exist.
    #[error("unknown group: {0}")]
    UnknownGroup(Uuid),

    /// The referenced entity does not exist.
    #[error("unknown entity: {0}")]
    UnknownEntity(Uuid),

    /// A profile document could not be decoded.
    #[error("malformed profile: {0}")]
    MalformedProfile(String),

    /// The underlying entity store failed.
    #[error("query backend failure: {0}")]
    Backend(String),
}

/// Result alias for query operations.
pub type QueryResult<T> = Result<T, QueryError>;
