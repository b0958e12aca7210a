use strata_types::ObjectKey;

/// Errors from store backend operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested key is not present in the backend.
    #[error("object not found: {0}")]
    NotFound(ObjectKey),

    /// A key string does not fit the backend's key scheme.
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    /// I/O error from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
