//! Error taxonomy shared by every subsystem.
//!
//! Layers wrap causes with a descriptive message but preserve the kind, so
//! callers can branch on [`Error::kind`] without string matching.

use std::time::Duration;

/// Coarse error classification for is-kind checks across layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-range argument; caller's fault, never retried.
    InvalidInput,
    /// No such row by ID.
    NotFound,
    /// A graph traversal hit one of its budgets.
    GraphBoundsExceeded,
    /// The LLM circuit breaker is open and failing fast.
    CircuitOpen,
    /// A per-call deadline fired.
    DeadlineExceeded,
    /// The surrounding operation was cancelled.
    Cancelled,
    /// Transport or storage hiccup; safe to retry.
    Transient,
    /// Backup verification or database consistency check failed.
    Integrity,
}

/// Error type for all memento-core operations.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or out-of-range argument
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// No such row
    #[error("not found: {0}")]
    NotFound(String),
    /// Traversal budget exhausted
    #[error("graph bounds exceeded: {0}")]
    GraphBoundsExceeded(String),
    /// Downstream LLM is failing fast
    #[error("circuit breaker is open")]
    CircuitOpen,
    /// Per-call deadline fired
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),
    /// Operation cancelled
    #[error("operation cancelled")]
    Cancelled,
    /// Retryable transport/storage failure
    #[error("transient failure: {0}")]
    Transient(String),
    /// Consistency check failed
    #[error("integrity failure: {0}")]
    Integrity(String),
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for all memento-core operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The taxonomy kind of this error, stable across wrapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::GraphBoundsExceeded(_) => ErrorKind::GraphBoundsExceeded,
            Error::CircuitOpen => ErrorKind::CircuitOpen,
            Error::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Integrity(_) => ErrorKind::Integrity,
            // Storage/transport/serde hiccups are retried by the enrichment
            // worker, never surfaced as caller mistakes.
            Error::Transient(_) | Error::Database(_) | Error::Io(_) | Error::Serialization(_) => {
                ErrorKind::Transient
            }
        }
    }

    /// True when the enrichment worker may retry this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transient | ErrorKind::DeadlineExceeded | ErrorKind::CircuitOpen
        )
    }
}
