//! Error types for bitgate

use crate::keys::{Node, NodeKind};

/// The main error type for bitgate operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A slug was referenced by a mutation before any bit was allocated for it.
    #[error("unknown slug '{0}'")]
    UnknownSlug(String),

    #[error("no principal supplied")]
    Unauthenticated,

    /// The holder cannot carry associations of this kind (e.g. a Role holding a Group).
    #[error("{holder} cannot hold a {unit}")]
    MissingCapability { holder: Node, unit: NodeKind },

    /// Raised by `Gate::authorize` and `Response::authorize`.
    #[error("{0}")]
    AuthorizationDenied(String),

    /// Recompute after a grant/revoke failed; the transaction was rolled back.
    #[error("propagation from {owner} failed: {reason}")]
    PropagationFailure { owner: Node, reason: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Duplicate(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("invalid config: {0}")]
    Config(String),
}

/// Result type alias for bitgate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Convert any storage-level error to `Error::Storage`
pub fn err<E: std::error::Error>(e: E) -> Error {
    Error::Storage(e.to_string())
}

/// Wrap a failure raised while recomputing dependents of `owner`.
pub(crate) fn propagation(owner: Node, e: Error) -> Error {
    match e {
        Error::PropagationFailure { .. } => e,
        other => Error::PropagationFailure { owner, reason: other.to_string() },
    }
}
