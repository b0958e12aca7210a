/// Errors from foundation type construction and parsing.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    /// An entity kind string was not one of the known kinds.
    #[error("unknown entity kind: {0}")]
    UnknownKind(String),

    /// An object key was empty or otherwise malformed.
    #[error("invalid object key: {0}")]
    InvalidKey(String),
}
